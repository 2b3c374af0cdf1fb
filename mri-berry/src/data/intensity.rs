//! 强度截断与归一化.

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_INTENSITY_CLIP, NORMALIZE_EPS};

/// 强度截断区间 `[low, high]`.
///
/// 该区间是只读的. 若要修改区间参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntensityClip {
    low: f32,
    high: f32,
}

impl Default for IntensityClip {
    #[inline]
    fn default() -> Self {
        let (low, high) = DEFAULT_INTENSITY_CLIP;
        Self { low, high }
    }
}

impl IntensityClip {
    /// 构建截断区间.
    ///
    /// `low` 和 `high` 必须为有限值且 `low < high`, 否则返回 `None`.
    pub fn new(low: f32, high: f32) -> Option<IntensityClip> {
        if low.is_finite() && high.is_finite() && low < high {
            Some(Self { low, high })
        } else {
            None
        }
    }

    /// 区间下限.
    #[inline]
    pub fn low(&self) -> f32 {
        self.low
    }

    /// 区间上限.
    #[inline]
    pub fn high(&self) -> f32 {
        self.high
    }

    /// 将 `v` 截断到区间内. NaN 保持不变.
    #[inline]
    pub fn clip(&self, v: f32) -> f32 {
        v.clamp(self.low, self.high)
    }
}

/// 先截断到 `clip`, 再做零均值单位方差归一化: `(v - mean) / (std + 1e-8)`.
///
/// 均值和 (总体) 标准差在截断后的整个体数据上以 `f64` 累加求得.
/// 常数体数据的输出全为 0, 不会产生 NaN.
pub fn normalize_intensity(data: ArrayView3<f32>, clip: IntensityClip) -> Array3<f32> {
    let clipped = data.mapv(|v| clip.clip(v));
    let n = clipped.len();
    if n == 0 {
        return clipped;
    }

    let mean = clipped.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = clipped
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    let std = var.sqrt();
    if std == 0.0 {
        log::warn!("normalizing a constant volume (value {mean})");
    }

    let denom = std + NORMALIZE_EPS;
    clipped.mapv_into(|v| ((v as f64 - mean) / denom) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_intensity_clip_invalid_input() {
        assert!(IntensityClip::new(1.0, 1.0).is_none());
        assert!(IntensityClip::new(2.0, 1.0).is_none());
        assert!(IntensityClip::new(f32::NAN, 1.0).is_none());
        assert!(IntensityClip::new(0.0, f32::INFINITY).is_none());

        let clip = IntensityClip::default();
        assert_eq!(clip.low(), -1000.0);
        assert_eq!(clip.high(), 4000.0);
        assert_eq!(clip.clip(-5000.0), -1000.0);
        assert_eq!(clip.clip(12.5), 12.5);
        assert_eq!(clip.clip(1e9), 4000.0);
    }

    #[test]
    fn test_normalize_zero_mean_unit_std() {
        let data = Array3::from_shape_fn((4, 5, 6), |(d, h, w)| (d * 30 + h * 6 + w) as f32 * 3.0 + 7.0);
        let out = normalize_intensity(data.view(), IntensityClip::default());
        let n = out.len() as f64;
        let mean = out.iter().map(|&v| v as f64).sum::<f64>() / n;
        let std = (out.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n).sqrt();
        assert!(mean.abs() < 1e-5, "mean = {mean}");
        assert!((std - 1.0).abs() < 1e-4, "std = {std}");
    }

    #[test]
    fn test_normalize_clips_first() {
        // 截断后只剩 {0, 10} 两种取值, 各占一半.
        let data = Array3::from_shape_fn((2, 2, 2), |(d, _, _)| if d == 0 { -1e6 } else { 1e6 });
        let clip = IntensityClip::new(0.0, 10.0).unwrap();
        let out = normalize_intensity(data.view(), clip);
        assert!((out[(0, 0, 0)] + 1.0).abs() < 1e-5);
        assert!((out[(1, 1, 1)] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalize_constant_volume() {
        let data = Array3::from_elem((3, 3, 3), 42.0f32);
        let out = normalize_intensity(data.view(), IntensityClip::default());
        assert!(out.iter().all(|v| *v == 0.0));
    }
}
