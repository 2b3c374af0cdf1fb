//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Spacing};
pub use crate::{LabelResampling, PipelineConfig, PipelineError, Result, TrainConfig};

pub use crate::consts::{Region, MODALITIES, REGIONS};
pub use crate::data::{IntensityClip, Interpolation, Volume};

pub use crate::dataset::{
    self, find_cases, home_dataset_dir_with, preprocess_dataset, BatchLoader, CaseDir, CasePreprocessor, CaseSource,
    Mode, NpzDataset, ProcessedCase,
};

pub use crate::infer::{Prediction, Predictor};
pub use crate::loss::{dice_score, BceDiceLoss};
pub use crate::mesh::{mask_to_mesh, marching_cubes, Mesh};
pub use crate::model::{AdamW, PointwiseModel, SegmentationModel, TrainableModel};
pub use crate::train::{Checkpoint, Trainer};
pub use crate::visual::save_overlay_grid;
