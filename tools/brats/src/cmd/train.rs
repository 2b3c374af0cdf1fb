use std::fs;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Args;
use mri_berry::consts::{DEFAULT_THRESHOLD, MODALITIES, REGIONS};
use mri_berry::prelude::*;
use utils::loader;

use super::{dir_or, heading};

#[derive(Args, Debug)]
pub struct Train {
    /// npz 数据集目录. 缺省时取 `$BRATS_PROCESSED_DIR` 或 `$HOME/dataset/brats/processed`.
    #[arg(long = "data-dir", short = 'd')]
    data_dir: Option<PathBuf>,

    /// 最优检查点路径. 缺省时写入结果目录下的 `unet3d_best.ckpt`.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// 训练轮数.
    #[arg(long, default_value_t = 150)]
    epochs: u32,

    /// 批大小.
    #[arg(long = "batch-size", default_value_t = 2)]
    batch_size: usize,

    /// 学习率.
    #[arg(long = "lr", default_value_t = 1e-4)]
    learning_rate: f64,

    /// 解耦权重衰减.
    #[arg(long = "weight-decay", default_value_t = 1e-5)]
    weight_decay: f64,

    /// 验证集占比.
    #[arg(long = "val-split", default_value_t = 0.2)]
    val_split: f64,

    /// 随机种子.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// 组合损失中 BCE 的权重.
    #[arg(long = "bce-weight", default_value_t = 0.5)]
    bce_weight: f32,
}

impl Train {
    /// 命令行参数对应的训练配置.
    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            weight_decay: self.weight_decay,
            val_split: self.val_split,
            seed: self.seed,
            bce_weight: self.bce_weight,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn run(self) -> Result<()> {
        let cfg = self.train_config();
        ensure!(cfg.batch_size > 0, "--batch-size must be positive");
        ensure!((0.0..1.0).contains(&cfg.val_split), "--val-split must lie in [0, 1)");
        ensure!((0.0..=1.0).contains(&cfg.bce_weight), "--bce-weight must lie in [0, 1]");

        let data_dir = dir_or(self.data_dir, loader::processed_dir_from_env_or_home, "dataset directory")?;
        let checkpoint = dir_or(self.checkpoint, loader::checkpoint_from_env_or_home, "checkpoint path")?;
        if let Some(parent) = checkpoint.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }

        let dataset = NpzDataset::discover(&data_dir)?;
        let (train, val) = dataset.split(cfg.val_split, cfg.seed);
        log::info!("{} cases: {} for training, {} for validation", dataset.len(), train.len(), val.len());

        let model = PointwiseModel::new(
            MODALITIES.len(),
            REGIONS.len(),
            AdamW::new(cfg.learning_rate, cfg.weight_decay),
        );
        let mut trainer = Trainer::new(model, cfg, &checkpoint);
        let reports = trainer.fit(&train, &val)?;

        heading("train")?;
        println!("epoch\ttrain_loss\ttrain_dice\tval_loss\tval_dice");
        for r in &reports {
            println!(
                "{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}{}",
                r.epoch,
                r.train.loss,
                r.train.dice,
                r.val.loss,
                r.val.dice,
                if r.saved { "\t*" } else { "" }
            );
        }
        heading("")?;
        if let Some(best) = trainer.best_dice() {
            println!("best val dice {best:.4}, saved to {}", checkpoint.display());
        }
        Ok(())
    }
}
