//! 推理: 载入检查点 -> 病例预处理 (推理模式) -> 模型前向 -> sigmoid -> 阈值化.

use std::path::Path;

use ndarray::{Array4, ArrayView3, ArrayView4, Axis};

use crate::consts::Region;
use crate::dataset::{single, CaseDir, CasePreprocessor, Mode, PreparedCase};
use crate::loss::sigmoid;
use crate::model::{SegmentationModel, TrainableModel};
use crate::train::Checkpoint;
use crate::{PipelineConfig, PipelineError, Result};

/// 单个病例的推理结果.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    /// `(R, D, H, W)` 逐区域概率.
    pub probabilities: Array4<f32>,

    /// `(R, D, H, W)` 阈值化后的二值区域栈.
    pub mask: Array4<f32>,
}

impl Prediction {
    /// 获取区域 `region` 的二值掩膜.
    #[inline]
    pub fn region_mask(&self, region: Region) -> ArrayView3<'_, f32> {
        self.mask.index_axis(Axis(0), region.channel())
    }
}

/// 将概率严格大于 `threshold` 的体素置 1, 其余置 0.
pub fn threshold_probabilities(probs: ArrayView4<f32>, threshold: f32) -> Array4<f32> {
    probs.mapv(|p| if p > threshold { 1.0 } else { 0.0 })
}

/// 推理驱动器.
pub struct Predictor<M: SegmentationModel> {
    model: M,
    pre: CasePreprocessor,
    threshold: f32,
}

impl<M: SegmentationModel> Predictor<M> {
    /// 以已就绪的模型创建. 阈值取 `cfg.threshold`.
    pub fn new(model: M, cfg: PipelineConfig) -> Self {
        let threshold = cfg.threshold;
        Self {
            model,
            pre: CasePreprocessor::new(cfg),
            threshold,
        }
    }

    /// 将检查点 `path` 载入新建的 `model` 后创建. 不修改检查点文件.
    pub fn from_checkpoint<P: AsRef<Path>>(mut model: M, path: P, cfg: PipelineConfig) -> Result<Self>
    where
        M: TrainableModel,
    {
        let ckpt = Checkpoint::<M::State>::load(path.as_ref())?;
        log::info!(
            "loaded checkpoint {} (epoch {}, val dice {:.4})",
            path.as_ref().display(),
            ckpt.epoch,
            ckpt.val_dice
        );
        model.load_state(ckpt.model_state)?;
        Ok(Self::new(model, cfg))
    }

    /// 设置概率阈值.
    #[inline]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// 概率阈值.
    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 模型.
    #[inline]
    pub fn model(&self) -> &M {
        &self.model
    }

    /// 病例预处理器.
    #[inline]
    pub fn preprocessor(&self) -> &CasePreprocessor {
        &self.pre
    }

    /// 对单个已预处理的 `(C, D, H, W)` 病例推理.
    pub fn predict(&self, image: &Array4<f32>) -> Result<Prediction> {
        let logits = self.model.forward(single(image).view())?;
        if logits.len_of(Axis(0)) != 1 || logits.shape()[2..] != image.shape()[1..] {
            return Err(PipelineError::shape(
                format!("(1, R, {:?}) logits", &image.shape()[1..]),
                logits.shape(),
            ));
        }
        let probabilities = logits.index_axis_move(Axis(0), 0).mapv_into(sigmoid);
        let mask = threshold_probabilities(probabilities.view(), self.threshold);
        Ok(Prediction { probabilities, mask })
    }

    /// 对一组模态文件 (顺序同 [`crate::consts::MODALITIES`]) 推理, 同时返回预处理后的影像.
    pub fn predict_files<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> Result<(Array4<f32>, Prediction)> {
        let (image, _) = self.pre.process_modalities(paths)?;
        let prediction = self.predict(&image)?;
        Ok((image, prediction))
    }

    /// 对病例目录推理. 目录中的分割文件 (若有) 被忽略.
    pub fn predict_case(&self, case: &CaseDir) -> Result<(PreparedCase, Prediction)> {
        let prepared = self.pre.process_case(case, Mode::Inference)?;
        let prediction = self.predict(&prepared.image)?;
        log::info!(
            "case {}: {} voxels above threshold in region 0",
            case.id(),
            prediction.mask.index_axis(Axis(0), 0).iter().filter(|v| **v > 0.0).count()
        );
        Ok((prepared, prediction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AdamW, AdamWState, PointwiseModel, PointwiseState};
    use ndarray::{Array1, Array2};

    #[test]
    fn test_threshold_is_strict() {
        let probs = Array4::from_shape_vec((1, 1, 1, 3), vec![0.2, 0.5, 0.9]).unwrap();
        let mask = threshold_probabilities(probs.view(), 0.5);
        assert_eq!(mask.iter().copied().collect::<Vec<_>>(), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_predict_and_checkpoint_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.ckpt");
        let ckpt = Checkpoint {
            epoch: 3,
            val_dice: 0.8,
            model_state: PointwiseState {
                weight: Array2::from_shape_vec((2, 1), vec![1.0, -1.0]).unwrap(),
                bias: Array1::zeros(2),
                optimizer: AdamWState::default(),
            },
        };
        ckpt.save(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();

        let model = PointwiseModel::new(1, 2, AdamW::new(1e-3, 0.0));
        let predictor = Predictor::from_checkpoint(model, &path, PipelineConfig::default()).unwrap();
        let image = Array4::from_shape_vec((1, 1, 1, 2), vec![-2.0, 2.0]).unwrap();
        let pred = predictor.predict(&image).unwrap();

        assert_eq!(pred.probabilities.dim(), (2, 1, 1, 2));
        assert!((pred.probabilities[(0, 0, 0, 1)] - sigmoid(2.0)).abs() < 1e-7);
        assert_eq!(pred.mask.iter().copied().collect::<Vec<_>>(), [0.0, 1.0, 1.0, 0.0]);
        assert_eq!(std::fs::read(&path).unwrap(), bytes);

        let strict = Predictor::from_checkpoint(PointwiseModel::new(1, 2, AdamW::new(1e-3, 0.0)), &path, PipelineConfig::default())
            .unwrap()
            .with_threshold(0.99);
        assert!(strict.predict(&image).unwrap().mask.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_checkpoint_for_other_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.ckpt");
        let model = PointwiseModel::new(4, 3, AdamW::new(1e-3, 0.0));
        Checkpoint {
            epoch: 1,
            val_dice: 0.1,
            model_state: model.state(),
        }
        .save(&path)
        .unwrap();
        let other = PointwiseModel::new(2, 3, AdamW::new(1e-3, 0.0));
        assert!(Predictor::from_checkpoint(other, &path, PipelineConfig::default()).is_err());
    }
}
