//! 各子命令及其共用参数.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, ensure, Context, Result};
use clap::Args;
use mri_berry::consts::{MODALITIES, REGIONS};
use mri_berry::prelude::*;

pub mod infer;
pub mod preprocess;
pub mod reconstruct;
pub mod train;
pub mod upload;

/// 预处理与推理共用的参数.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// 目标体素分辨率, 毫米.
    #[arg(long, num_args = 3, value_names = ["D", "H", "W"], default_values_t = [1.0, 1.0, 1.0])]
    spacing: Vec<f64>,

    /// 规范化后的空间形状.
    #[arg(long = "patch-size", num_args = 3, value_names = ["D", "H", "W"], default_values_t = [128, 128, 128])]
    patch_size: Vec<usize>,

    /// 强度截断区间.
    #[arg(
        long,
        num_args = 2,
        value_names = ["LOW", "HIGH"],
        default_values_t = [-1000.0, 4000.0],
        allow_negative_numbers = true
    )]
    clip: Vec<f32>,

    /// 标签图使用线性插值 (默认最近邻).
    #[arg(long = "label-linear")]
    label_linear: bool,

    /// 概率阈值.
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,
}

impl PipelineArgs {
    /// 转换为流水线配置. 参数非法时返回 `Err`.
    pub fn config(&self) -> Result<PipelineConfig> {
        let &[sd, sh, sw] = self.spacing.as_slice() else {
            bail!("--spacing takes three values");
        };
        let spacing = [sd, sh, sw];
        ensure!(
            spacing.iter().all(|s| s.is_finite() && *s > 0.0),
            "--spacing must be positive, got {spacing:?}"
        );
        let &[d, h, w] = self.patch_size.as_slice() else {
            bail!("--patch-size takes three values");
        };
        ensure!(d * h * w > 0, "--patch-size must be non-zero");
        let &[low, high] = self.clip.as_slice() else {
            bail!("--clip takes two values");
        };
        let clip = IntensityClip::new(low, high).with_context(|| format!("invalid --clip [{low}, {high}]"))?;
        ensure!(
            self.threshold > 0.0 && self.threshold < 1.0,
            "--threshold must lie in (0, 1)"
        );

        let resampling = if self.label_linear {
            LabelResampling::Linear
        } else {
            LabelResampling::Nearest
        };
        Ok(PipelineConfig::default()
            .with_target_spacing(spacing)
            .with_patch_size((d, h, w))
            .with_intensity_clip(clip)
            .with_label_resampling(resampling)
            .with_threshold(self.threshold))
    }
}

/// 未显式给出路径时退回到环境变量或主目录下的默认位置.
pub fn dir_or(given: Option<PathBuf>, fallback: fn() -> Option<PathBuf>, what: &str) -> Result<PathBuf> {
    given
        .or_else(fallback)
        .with_context(|| format!("cannot locate the {what}; pass it explicitly"))
}

/// 以检查点创建推理器. 模型结构与训练时一致.
pub fn load_predictor(checkpoint: Option<PathBuf>, cfg: PipelineConfig) -> Result<Predictor<PointwiseModel>> {
    let checkpoint = dir_or(checkpoint, utils::loader::checkpoint_from_env_or_home, "checkpoint")?;
    let model = PointwiseModel::new(MODALITIES.len(), REGIONS.len(), AdamW::new(0.0, 0.0));
    Predictor::from_checkpoint(model, &checkpoint, cfg)
        .with_context(|| format!("loading checkpoint {}", checkpoint.display()))
}

/// 报告分节标题的总宽度.
const HEADING_WIDTH: usize = 56;

/// 以 `=` 填充并居中的分节标题. 标题为空时输出一条整宽的分隔线.
pub fn heading_to<W: Write>(mut w: W, title: &str) -> io::Result<()> {
    if title.is_empty() {
        return writeln!(w, "{}", "=".repeat(HEADING_WIDTH));
    }
    let title = format!(" {title} ");
    let fill = HEADING_WIDTH.saturating_sub(title.chars().count());
    let left = fill / 2;
    writeln!(w, "{}{title}{}", "=".repeat(left), "=".repeat(fill - left))
}

/// 向标准输出写分节标题.
pub fn heading(title: &str) -> Result<()> {
    heading_to(io::stdout().lock(), title).context("writing report")
}
