#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 BraTS 格式多模态 3D MRI 病例的预处理、分割模型编排、
//! 评估与三维重建算法.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 目前主要负责处理 BraTS 数据 (t1, t1ce, t2, flair + seg),
//!   没有对其它源的数据进行直接适配 (但如果新数据按照 BraTS 模式进行组织, 也可以工作).
//! 2. 分割网络本身 (卷积、归一化层、自动微分) 不属于本 crate 的范围.
//!   本 crate 只约定其输入/输出形状, 见 [`model`].
//! 3. 所有配置均以 [`PipelineConfig`] / [`TrainConfig`] 值的形式显式传入, 不存在全局单例.
//!
//! # 开发计划
//!
//! ### 体数据读写 ✅
//!
//! 读取时将 nifti 原生的 `(W, H, D)` 轴序翻转为 `(D, H, W)`, 体素分辨率同理.
//!
//! 实现位于 `mri-berry/src/data/mod.rs`.
//!
//! ### 重采样 & 强度归一化 & 形状规范化 ✅
//!
//! 1. 按物理分辨率进行 (三) 线性插值重采样, 标签可选最近邻. ✅
//! 2. 截断后零均值单位方差归一化. ✅
//! 3. 逐轴独立的中心裁剪/零填充. ✅
//!
//! 实现位于 `mri-berry/src/data/{resample, intensity, canonical}.rs`.
//!
//! ### 病例预处理 & 数据集 ✅
//!
//! 病例目录发现、多模态堆叠、标签区域栈派生、npz 归档、训练/验证划分、批加载器.
//!
//! 实现位于 `mri-berry/src/dataset`.
//!
//! ### 损失函数 & 评估指标 ✅
//!
//! Soft Dice + BCE 组合损失 (带对 logits 的解析梯度), 以及阈值化后的 hard Dice.
//!
//! 实现位于 `mri-berry/src/loss.rs`.
//!
//! ### 训练循环 & 最优检查点 ✅
//!
//! 检查点以临时文件 + rename 的方式原子覆盖.
//!
//! 实现位于 `mri-berry/src/train`.
//!
//! ### 推理 ✅
//!
//! 实现位于 `mri-berry/src/infer.rs`.
//!
//! ### Marching cubes 三维重建 & OBJ/STL 导出 ✅
//!
//! 查找表在首次使用时由立方体各面的拓扑关系生成, 而非手写 256 行常量.
//!
//! 实现位于 `mri-berry/src/mesh`.
//!
//! ### 小功能 ✅
//!
//! 1. 推理结果的切片叠加可视化. ✅
//! 2. 上传文件边界 (四个模态文件 -> 掩膜 + 网格). ✅

/// 三维索引, 同时也可一定程度上用作非负整数向量. 按 `(D, H, W)` 组织.
pub type Idx3d = (usize, usize, usize);

/// 体素物理分辨率, 以毫米为单位, 按 `(D, H, W)` 组织.
pub type Spacing = [f64; 3];

/// 作用于 (可能已被插值的) 标签值上的区域谓词.
pub type Predicate = fn(f32) -> bool;

pub mod config;
pub mod consts;
pub mod data;
pub mod dataset;
mod error;
pub mod infer;
pub mod loss;
pub mod mesh;
pub mod model;
pub mod prelude;
pub mod service;
pub mod train;
pub mod visual;

pub use config::{LabelResampling, PipelineConfig, TrainConfig};
pub use data::{IntensityClip, Interpolation, Volume};
pub use error::{PipelineError, Result};
