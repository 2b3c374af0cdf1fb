//! 训练循环.
//!
//! `Init -> {TrainEpoch -> ValEpoch} * N -> Done`. 每轮验证结束后, 若验证 Dice
//! 严格优于此前所有轮次, 则原子地覆盖最优检查点. 任一批次出错即中止整个训练.

use std::path::{Path, PathBuf};

use crate::dataset::{BatchLoader, CaseSource};
use crate::loss::{dice_score, BceDiceLoss};
use crate::model::TrainableModel;
use crate::{PipelineError, Result, TrainConfig};

mod checkpoint;

pub use checkpoint::Checkpoint;

/// 训练阶段.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    /// 计算梯度并更新参数.
    Train,

    /// 只做前向评估.
    Val,
}

/// 一个阶段在整个数据集上按批大小加权的平均值.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct EpochStats {
    /// 平均组合损失.
    pub loss: f64,

    /// 平均 hard Dice.
    pub dice: f64,

    /// 病例个数.
    pub cases: usize,
}

/// 单轮训练报告.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EpochReport {
    /// 轮次, 从 1 开始.
    pub epoch: u32,

    /// 训练阶段统计.
    pub train: EpochStats,

    /// 验证阶段统计.
    pub val: EpochStats,

    /// 本轮是否写入了新的最优检查点.
    pub saved: bool,
}

/// 训练器. 在训练期间独占模型.
pub struct Trainer<M: TrainableModel> {
    model: M,
    criterion: BceDiceLoss,
    cfg: TrainConfig,
    checkpoint_path: PathBuf,
    best: Option<f64>,
}

impl<M: TrainableModel> Trainer<M> {
    /// 创建训练器. 最优检查点写入 `checkpoint_path`.
    pub fn new<P: AsRef<Path>>(model: M, cfg: TrainConfig, checkpoint_path: P) -> Self {
        Self {
            model,
            criterion: BceDiceLoss::new(cfg.bce_weight),
            cfg,
            checkpoint_path: checkpoint_path.as_ref().to_owned(),
            best: None,
        }
    }

    /// 当前模型.
    #[inline]
    pub fn model(&self) -> &M {
        &self.model
    }

    /// 取回模型.
    #[inline]
    pub fn into_model(self) -> M {
        self.model
    }

    /// 本次训练至今的最优验证 Dice.
    #[inline]
    pub fn best_dice(&self) -> Option<f64> {
        self.best
    }

    /// 最优检查点路径.
    #[inline]
    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    fn run_phase<S: CaseSource>(&mut self, source: &S, phase: Phase, seed: u64) -> Result<EpochStats> {
        let loader = match phase {
            Phase::Train => BatchLoader::new(source, self.cfg.batch_size).shuffled(seed),
            Phase::Val => BatchLoader::new(source, self.cfg.batch_size),
        };

        let mut stats = EpochStats::default();
        for batch in loader {
            let batch = batch?;
            let n = batch.len();
            let logits = self.model.forward(batch.images.view())?;
            let loss = match phase {
                Phase::Train => {
                    let (loss, grad) = self.criterion.loss_and_grad(logits.view(), batch.masks.view())?;
                    self.model.step(batch.images.view(), grad.view())?;
                    loss
                }
                Phase::Val => self.criterion.loss(logits.view(), batch.masks.view())?,
            };
            let dice = dice_score(logits.view(), batch.masks.view(), self.cfg.threshold)?;
            log::debug!("{phase:?} batch of {n}: loss {loss:.4}, dice {dice:.4}");

            stats.loss += loss * n as f64;
            stats.dice += dice * n as f64;
            stats.cases += n;
        }

        if stats.cases > 0 {
            stats.loss /= stats.cases as f64;
            stats.dice /= stats.cases as f64;
        }
        Ok(stats)
    }

    /// 在 `source` 上训练一轮, `seed` 决定本轮的打乱顺序.
    pub fn train_epoch<S: CaseSource>(&mut self, source: &S, seed: u64) -> Result<EpochStats> {
        self.run_phase(source, Phase::Train, seed)
    }

    /// 在 `source` 上评估一轮. 不更新参数.
    pub fn eval_epoch<S: CaseSource>(&mut self, source: &S) -> Result<EpochStats> {
        self.run_phase(source, Phase::Val, 0)
    }

    /// 记录第 `epoch` 轮的验证 Dice. 严格优于此前最优值 (或尚无最优值) 时写入检查点
    /// 并返回 `true`, 否则不写任何文件并返回 `false`. 非有限值 (NaN, ±inf) 从不视为改进.
    pub fn observe(&mut self, epoch: u32, val_dice: f64) -> Result<bool> {
        if !val_dice.is_finite() {
            log::warn!("epoch {epoch}: ignoring non-finite validation dice {val_dice}");
            return Ok(false);
        }
        if self.best.map_or(false, |best| val_dice <= best) {
            return Ok(false);
        }
        let ckpt = Checkpoint {
            epoch,
            val_dice,
            model_state: self.model.state(),
        };
        ckpt.save(&self.checkpoint_path)?;
        self.best = Some(val_dice);
        log::info!(
            "saved new best checkpoint (dice {val_dice:.4}) to {}",
            self.checkpoint_path.display()
        );
        Ok(true)
    }

    /// 完整训练 `cfg.epochs` 轮. 训练集或验证集为空时返回 [`PipelineError::EmptyDataset`].
    pub fn fit<S: CaseSource, V: CaseSource>(&mut self, train: &S, val: &V) -> Result<Vec<EpochReport>> {
        if train.is_empty() {
            return Err(PipelineError::EmptyDataset("the training split".to_owned()));
        }
        if val.is_empty() {
            return Err(PipelineError::EmptyDataset("the validation split".to_owned()));
        }

        let epochs = self.cfg.epochs;
        let mut reports = Vec::with_capacity(epochs as usize);
        for epoch in 1..=epochs {
            let train_stats = self.train_epoch(train, self.cfg.seed.wrapping_add(epoch as u64))?;
            let val_stats = self.eval_epoch(val)?;
            log::info!(
                "epoch {epoch}/{epochs} | train loss {:.4} dice {:.4} | val loss {:.4} dice {:.4}",
                train_stats.loss,
                train_stats.dice,
                val_stats.loss,
                val_stats.dice
            );
            let saved = self.observe(epoch, val_stats.dice)?;
            reports.push(EpochReport {
                epoch,
                train: train_stats,
                val: val_stats,
                saved,
            });
        }
        Ok(reports)
    }
}
