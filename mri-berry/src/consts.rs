//! 通用常量.

use crate::Predicate;

/// 原 BraTS 数据集中的标签值.
pub mod label {
    /// 背景.
    pub const BRATS_BACKGROUND: u8 = 0;

    /// 坏死 / 非增强肿瘤核心 (NCR/NET).
    pub const BRATS_NECROTIC: u8 = 1;

    /// 瘤周水肿 (ED).
    pub const BRATS_EDEMA: u8 = 2;

    /// 增强肿瘤 (ET). BraTS 跳过了 3.
    pub const BRATS_ENHANCING: u8 = 4;

    /// 体素是否属于全肿瘤 (WT)? 即任意非零标签.
    #[inline]
    pub fn is_whole_tumor(v: f32) -> bool {
        v > BRATS_BACKGROUND as f32
    }

    /// 体素是否属于肿瘤核心 (TC)? 即标签为 1 或 4.
    #[inline]
    pub fn is_tumor_core(v: f32) -> bool {
        v == BRATS_NECROTIC as f32 || v == BRATS_ENHANCING as f32
    }

    /// 体素是否属于增强肿瘤 (ET)? 即标签为 4.
    #[inline]
    pub fn is_enhancing_tumor(v: f32) -> bool {
        v == BRATS_ENHANCING as f32
    }
}

/// 成像模态名称, 顺序即多通道体数据的通道顺序.
pub const MODALITIES: [&str; 4] = ["t1", "t1ce", "t2", "flair"];

/// 真值分割文件的名称标记.
pub const SEGMENTATION: &str = "seg";

/// 临床区域. 区域之间可以重叠 (TC ⊂ WT, ET ⊂ TC).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Region {
    /// 全肿瘤, 标签非零.
    WholeTumor,

    /// 肿瘤核心, 标签属于 {1, 4}.
    TumorCore,

    /// 增强肿瘤, 标签等于 4.
    EnhancingTumor,
}

/// 区域栈中的固定区域顺序. 必须与模型输出通道顺序一致.
pub const REGIONS: [Region; 3] = [Region::WholeTumor, Region::TumorCore, Region::EnhancingTumor];

impl Region {
    /// 该区域在标签值上的谓词.
    #[inline]
    pub fn predicate(self) -> Predicate {
        match self {
            Region::WholeTumor => label::is_whole_tumor,
            Region::TumorCore => label::is_tumor_core,
            Region::EnhancingTumor => label::is_enhancing_tumor,
        }
    }

    /// 区域缩写.
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Region::WholeTumor => "WT",
            Region::TumorCore => "TC",
            Region::EnhancingTumor => "ET",
        }
    }

    /// 区域在区域栈中的通道索引.
    #[inline]
    pub fn channel(self) -> usize {
        match self {
            Region::WholeTumor => 0,
            Region::TumorCore => 1,
            Region::EnhancingTumor => 2,
        }
    }
}

/// 默认目标体素分辨率 (毫米).
pub const DEFAULT_TARGET_SPACING: [f64; 3] = [1.0, 1.0, 1.0];

/// 默认输入块大小.
pub const DEFAULT_PATCH_SIZE: (usize, usize, usize) = (128, 128, 128);

/// 默认强度截断区间.
pub const DEFAULT_INTENSITY_CLIP: (f32, f32) = (-1000.0, 4000.0);

/// 归一化时防止除零的小量.
pub const NORMALIZE_EPS: f64 = 1e-8;

/// Soft Dice 损失的平滑项.
pub const DICE_SMOOTH: f64 = 1e-5;

/// Hard Dice 指标的平滑项.
pub const DICE_EPS: f64 = 1e-5;

/// 默认概率阈值, 同时也是二值掩膜的 marching cubes 等值面.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// 最优检查点的默认文件名.
pub const BEST_CHECKPOINT: &str = "unet3d_best.ckpt";

#[cfg(test)]
mod tests {
    use super::label::*;
    use super::{Region, REGIONS};

    #[test]
    fn test_region_order_matches_channel() {
        for (i, r) in REGIONS.iter().enumerate() {
            assert_eq!(r.channel(), i);
        }
    }

    #[test]
    fn test_region_predicates() {
        let labels = [0.0, 1.0, 2.0, 4.0];
        let wt: Vec<bool> = labels.iter().map(|&v| is_whole_tumor(v)).collect();
        let tc: Vec<bool> = labels.iter().map(|&v| is_tumor_core(v)).collect();
        let et: Vec<bool> = labels.iter().map(|&v| is_enhancing_tumor(v)).collect();
        assert_eq!(wt, [false, true, true, true]);
        assert_eq!(tc, [false, true, false, true]);
        assert_eq!(et, [false, false, false, true]);

        // 插值产生的非整数值只可能落入 WT.
        assert!(Region::WholeTumor.predicate()(0.25));
        assert!(!Region::TumorCore.predicate()(0.25));
        assert!(!Region::EnhancingTumor.predicate()(3.5));
    }
}
