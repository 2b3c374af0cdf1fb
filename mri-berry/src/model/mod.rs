//! 分割模型接口.
//!
//! 本 crate 不实现多分辨率编码器/解码器网络本身, 只约定其输入输出:
//! `(B, C, D, H, W)` 的多模态影像 -> `(B, R, D, H, W)` 的逐区域 logits,
//! 空间形状不变, 通道顺序同 [`crate::consts::REGIONS`].

use ndarray::{Array5, ArrayView5};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{PipelineError, Result};

mod pointwise;

pub use pointwise::{AdamW, AdamWState, PointwiseModel, PointwiseState};

/// 推理阶段的分割模型.
pub trait SegmentationModel {
    /// 输入模态通道数.
    fn in_channels(&self) -> usize;

    /// 输出区域通道数.
    fn out_channels(&self) -> usize;

    /// 前向计算, 不记录任何梯度信息.
    fn forward(&self, images: ArrayView5<f32>) -> Result<Array5<f32>>;
}

/// 可训练的分割模型.
pub trait TrainableModel: SegmentationModel {
    /// 可持久化的模型状态, 包括参数与优化器状态.
    type State: Serialize + DeserializeOwned;

    /// 给定输入及损失对 logits 的梯度, 反向传播并执行一步参数更新.
    fn step(&mut self, images: ArrayView5<f32>, grad_logits: ArrayView5<f32>) -> Result<()>;

    /// 导出当前状态.
    fn state(&self) -> Self::State;

    /// 载入状态. 状态与模型结构不匹配时返回 [`PipelineError::Model`].
    fn load_state(&mut self, state: Self::State) -> Result<()>;
}

/// 检查输入是否为 `in_channels` 通道的 5D 数组.
pub(crate) fn check_input(images: &ArrayView5<f32>, in_channels: usize) -> Result<()> {
    if images.shape()[1] != in_channels {
        return Err(PipelineError::shape(
            format!("(B, {in_channels}, D, H, W) images"),
            images.shape(),
        ));
    }
    Ok(())
}
