//! 对 `mri-berry::dataset` 的更一层封装. 按环境变量或用户主目录定位数据集.

use mri_berry::consts::BEST_CHECKPOINT;
use mri_berry::dataset::{self, CaseDir, NpzDataset};
use std::env;
use std::path::PathBuf;

/// 环境变量 `var` 非空时返回其值, 否则返回 `$HOME/dataset/brats/{tail}`.
fn env_or_home(var: &str, tail: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => dataset::home_dataset_dir_with(["brats", tail]),
    }
}

/// 获取原始 BraTS 病例根目录.
///
/// 1. 若环境变量 `$BRATS_RAW_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/brats/raw`.
#[inline]
pub fn raw_dir_from_env_or_home() -> Option<PathBuf> {
    env_or_home("BRATS_RAW_DIR", "raw")
}

/// 获取预处理后的 npz 归档目录.
///
/// 1. 若环境变量 `$BRATS_PROCESSED_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/brats/processed`.
#[inline]
pub fn processed_dir_from_env_or_home() -> Option<PathBuf> {
    env_or_home("BRATS_PROCESSED_DIR", "processed")
}

/// 获取结果输出目录 (检查点、掩膜、网格和可视化图片).
///
/// 1. 若环境变量 `$BRATS_RESULTS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/brats/results`.
#[inline]
pub fn results_dir_from_env_or_home() -> Option<PathBuf> {
    env_or_home("BRATS_RESULTS_DIR", "results")
}

/// 结果目录下的最优检查点路径.
#[inline]
pub fn checkpoint_from_env_or_home() -> Option<PathBuf> {
    results_dir_from_env_or_home().map(|d| d.join(BEST_CHECKPOINT))
}

/// 从 `$BRATS_RAW_DIR` 或者 `$HOME/dataset/brats/raw` 下发现所有病例目录.
pub fn cases_from_env_or_home() -> Option<mri_berry::Result<Vec<CaseDir>>> {
    raw_dir_from_env_or_home().map(dataset::find_cases)
}

/// 从 `$BRATS_PROCESSED_DIR` 或者 `$HOME/dataset/brats/processed` 下加载 npz 数据集.
pub fn processed_from_env_or_home() -> Option<mri_berry::Result<NpzDataset>> {
    processed_dir_from_env_or_home().map(NpzDataset::discover)
}
