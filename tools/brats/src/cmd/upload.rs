use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use mri_berry::service::predict_upload;
use utils::loader;

use super::{dir_or, load_predictor, PipelineArgs};

#[derive(Args, Debug)]
pub struct PredictUpload {
    /// T1 文件 (`.nii` 或 `.nii.gz`).
    #[arg(long)]
    t1: PathBuf,

    /// T1ce 文件.
    #[arg(long)]
    t1ce: PathBuf,

    /// T2 文件.
    #[arg(long)]
    t2: PathBuf,

    /// FLAIR 文件.
    #[arg(long)]
    flair: PathBuf,

    /// 检查点路径. 缺省时取结果目录下的 `unet3d_best.ckpt`.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// 结果目录. 缺省时取 `$BRATS_RESULTS_DIR` 或 `$HOME/dataset/brats/results`.
    #[arg(long = "results-dir", short = 'o')]
    results_dir: Option<PathBuf>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl PredictUpload {
    pub fn run(self) -> Result<()> {
        let results_dir = dir_or(self.results_dir, loader::results_dir_from_env_or_home, "results directory")?;
        let predictor = load_predictor(self.checkpoint, self.pipeline.config()?)?;

        let mut uploads = HashMap::new();
        for (name, path) in [("t1", &self.t1), ("t1ce", &self.t1ce), ("t2", &self.t2), ("flair", &self.flair)] {
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            uploads.insert(name.to_owned(), bytes);
        }

        let resp = predict_upload(&uploads, &predictor, &results_dir)?;
        println!("{}", serde_json::to_string_pretty(&resp)?);
        Ok(())
    }
}
