use std::path::PathBuf;

use anyhow::{ensure, Result};
use clap::Args;
use mri_berry::prelude::*;
use utils::loader;

use super::{dir_or, heading, PipelineArgs};

#[derive(Args, Debug)]
pub struct Preprocess {
    /// 原始病例根目录. 缺省时取 `$BRATS_RAW_DIR` 或 `$HOME/dataset/brats/raw`.
    #[arg(long = "raw-dir", short = 'r')]
    raw_dir: Option<PathBuf>,

    /// npz 输出目录. 缺省时取 `$BRATS_PROCESSED_DIR` 或 `$HOME/dataset/brats/processed`.
    #[arg(long = "out-dir", short = 'o')]
    out_dir: Option<PathBuf>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl Preprocess {
    pub fn run(self) -> Result<()> {
        let raw_dir = dir_or(self.raw_dir, loader::raw_dir_from_env_or_home, "raw dataset directory")?;
        let out_dir = dir_or(self.out_dir, loader::processed_dir_from_env_or_home, "output directory")?;
        let pre = CasePreprocessor::new(self.pipeline.config()?);

        let report = preprocess_dataset(&raw_dir, &out_dir, &pre)?;
        let failed: Vec<_> = report
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (id, e)))
            .collect();

        heading("preprocess")?;
        println!(
            "{} 个病例, 成功 {}, 失败 {}",
            report.len(),
            report.len() - failed.len(),
            failed.len()
        );
        for (id, e) in &failed {
            println!("  {id}: {e}");
        }
        heading("")?;
        ensure!(
            report.is_empty() || failed.len() < report.len(),
            "every case under {} failed",
            raw_dir.display()
        );
        Ok(())
    }
}
