//! 推理结果的切片叠加可视化.

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use itertools::{Itertools, MinMaxResult};
use ndarray::{ArrayView2, ArrayView3, Axis};

use crate::{PipelineError, Result};

/// 网格列数.
const GRID_COLUMNS: usize = 4;

/// 掩膜叠加的不透明度.
const OVERLAY_ALPHA: f32 = 0.4;

/// 在 `[0, d)` 上均匀取 `n` 个切片下标 (向下取整, 首尾包含在内).
pub fn slice_indices(d: usize, n: usize) -> Vec<usize> {
    match (d, n) {
        (0, _) | (_, 0) => vec![],
        (_, 1) => vec![0],
        _ => (0..n).map(|i| i * (d - 1) / (n - 1)).collect(),
    }
}

/// 将单张切片按 min/ptp 规范化为灰度, 掩膜 (`> 0.5`) 处以红色按 0.4 不透明度叠加.
pub fn overlay_slice(image: ArrayView2<f32>, mask: ArrayView2<f32>) -> RgbImage {
    let (lo, hi) = match image.iter().copied().minmax() {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    };
    let ptp = hi - lo + 1e-8;

    let (height, width) = image.dim();
    let mut buf = RgbImage::new(width as u32, height as u32);
    for ((h, w), &v) in image.indexed_iter() {
        let g = ((v - lo) / ptp).clamp(0.0, 1.0);
        let rgb = if mask[(h, w)] > 0.5 {
            [(1.0 - OVERLAY_ALPHA) * g + OVERLAY_ALPHA, (1.0 - OVERLAY_ALPHA) * g, (1.0 - OVERLAY_ALPHA) * g]
        } else {
            [g, g, g]
        };
        buf.put_pixel(w as u32, h as u32, Rgb(rgb.map(|c| (c * 255.0).round() as u8)));
    }
    buf
}

/// 将 `volume` 中均匀选取的 `n_slices` 张轴向切片与 `mask` 叠加, 以 4 列网格保存为图片.
///
/// `volume` 与 `mask` 形状必须一致, 否则返回 [`PipelineError::ShapeMismatch`].
pub fn save_overlay_grid<P: AsRef<Path>>(
    volume: ArrayView3<f32>,
    mask: ArrayView3<f32>,
    path: P,
    n_slices: usize,
) -> Result<()> {
    if volume.shape() != mask.shape() {
        return Err(PipelineError::shape(
            format!("mask shaped {:?}", volume.shape()),
            mask.shape(),
        ));
    }
    let (d, h, w) = volume.dim();
    let indices = slice_indices(d, n_slices);
    let rows = (indices.len() + GRID_COLUMNS - 1) / GRID_COLUMNS;
    let mut grid = RgbImage::new((GRID_COLUMNS * w) as u32, (rows * h) as u32);

    for (k, &idx) in indices.iter().enumerate() {
        let tile = overlay_slice(volume.index_axis(Axis(0), idx), mask.index_axis(Axis(0), idx));
        let (x0, y0) = ((k % GRID_COLUMNS * w) as u32, (k / GRID_COLUMNS * h) as u32);
        for (x, y, px) in tile.enumerate_pixels() {
            grid.put_pixel(x0 + x, y0 + y, *px);
        }
    }

    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    grid.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use ndarray::Array3;

    #[test]
    fn test_slice_indices() {
        assert_eq!(slice_indices(128, 16).len(), 16);
        assert_eq!(slice_indices(128, 16)[0], 0);
        assert_eq!(slice_indices(128, 16)[15], 127);
        assert_eq!(slice_indices(10, 4), [0, 3, 6, 9]);
        assert_eq!(slice_indices(3, 1), [0]);
        assert!(slice_indices(0, 16).is_empty());
    }

    #[test]
    fn test_overlay_colours() {
        let image = ndarray::arr2(&[[0.0f32, 10.0]]);
        let mask = ndarray::arr2(&[[1.0f32, 0.0]]);
        let img = overlay_slice(image.view(), mask.view());
        assert_eq!(img.get_pixel(0, 0).0, [102, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_save_overlay_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("case_overlay.png");
        let vol = Array3::from_shape_fn((20, 6, 5), |(d, h, w)| (d + h + w) as f32);
        let mask = vol.mapv(|v| (v > 12.0) as u8 as f32);
        save_overlay_grid(vol.view(), mask.view(), &path, 16).unwrap();

        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (4 * 5, 4 * 6));

        let bad = Array3::<f32>::zeros((20, 6, 4));
        assert!(save_overlay_grid(vol.view(), bad.view(), &path, 16).is_err());
    }
}
