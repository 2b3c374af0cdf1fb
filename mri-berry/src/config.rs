//! 流水线配置.
//!
//! 配置以普通值的形式显式传入各组件的构造函数, 不存在进程级单例.

use crate::consts::*;
use crate::data::IntensityClip;
use crate::{Idx3d, Spacing};
use serde::{Deserialize, Serialize};

/// 分割标签图的重采样方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum LabelResampling {
    /// 最近邻. 保证重采样后的值仍是合法的类别标签.
    #[default]
    Nearest,

    /// 与强度体数据相同的线性插值. 边界处会产生非类别的小数值.
    Linear,
}

/// 预处理、推理与重建共用的配置.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 目标体素分辨率, `(D, H, W)`, 毫米.
    pub target_spacing: Spacing,

    /// 规范化后的空间形状, `(D, H, W)`.
    pub patch_size: Idx3d,

    /// 强度截断区间.
    pub intensity_clip: IntensityClip,

    /// 标签图的重采样方式.
    pub label_resampling: LabelResampling,

    /// 概率阈值.
    pub threshold: f32,

    /// Marching cubes 等值面.
    pub iso_level: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_spacing: DEFAULT_TARGET_SPACING,
            patch_size: DEFAULT_PATCH_SIZE,
            intensity_clip: IntensityClip::default(),
            label_resampling: LabelResampling::default(),
            threshold: DEFAULT_THRESHOLD,
            iso_level: DEFAULT_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    /// 设置目标体素分辨率.
    ///
    /// # 注意
    ///
    /// 各分量必须为正数, 否则程序 panic.
    pub fn with_target_spacing(mut self, spacing: Spacing) -> Self {
        assert!(
            spacing.iter().all(|s| s.is_finite() && *s > 0.0),
            "目标体素分辨率必须为正数: {spacing:?}"
        );
        self.target_spacing = spacing;
        self
    }

    /// 设置规范化后的空间形状.
    #[inline]
    pub fn with_patch_size(mut self, patch_size: Idx3d) -> Self {
        self.patch_size = patch_size;
        self
    }

    /// 设置强度截断区间.
    #[inline]
    pub fn with_intensity_clip(mut self, clip: IntensityClip) -> Self {
        self.intensity_clip = clip;
        self
    }

    /// 设置标签图的重采样方式.
    #[inline]
    pub fn with_label_resampling(mut self, scheme: LabelResampling) -> Self {
        self.label_resampling = scheme;
        self
    }

    /// 设置概率阈值.
    #[inline]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

/// 训练配置.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// 训练轮数.
    pub epochs: u32,

    /// 批大小.
    pub batch_size: usize,

    /// 学习率.
    pub learning_rate: f64,

    /// 解耦权重衰减.
    pub weight_decay: f64,

    /// 验证集占比.
    pub val_split: f64,

    /// 随机种子, 用于数据集划分与每轮打乱.
    pub seed: u64,

    /// 组合损失中 BCE 的权重, Dice 的权重为 `1 - bce_weight`.
    pub bce_weight: f32,

    /// 计算 hard Dice 时的概率阈值.
    pub threshold: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 150,
            batch_size: 2,
            learning_rate: 1e-4,
            weight_decay: 1e-5,
            val_split: 0.2,
            seed: 42,
            bce_weight: 0.5,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl TrainConfig {
    /// 设置训练轮数.
    #[inline]
    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }

    /// 设置批大小. `batch_size` 为 0 时程序 panic.
    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        assert_ne!(batch_size, 0, "批大小不能为 0");
        self.batch_size = batch_size;
        self
    }

    /// 设置学习率.
    #[inline]
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// 设置随机种子.
    #[inline]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
