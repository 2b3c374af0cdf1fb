//! 数据集操作: 病例目录发现、病例预处理、npz 归档与批加载.

use std::fs;
use std::path::{Path, PathBuf};

mod case;
mod loader;
mod npz_database;

pub use case::{find_cases, CaseDir, CasePreprocessor, Mode, PreparedCase};
pub use loader::{single, Batch, BatchLoader, CaseSource, NpzDataset};
pub use npz_database::ProcessedCase;

use crate::{PipelineError, Result};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 预处理并保存单个训练病例, 返回 `{out_dir}/{case_id}.npz`.
fn preprocess_one(pre: &CasePreprocessor, case: &CaseDir, out_dir: &Path) -> Result<PathBuf> {
    let prepared = pre.process_case(case, Mode::Training)?;
    let out = out_dir.join(format!("{}.npz", prepared.id));
    let processed = ProcessedCase {
        image: prepared.image,
        mask: prepared.mask.ok_or_else(|| PipelineError::MissingLabel {
            found: 0,
            case_dir: case.path().to_owned(),
        })?,
    };
    processed.save(&out)?;
    Ok(out)
}

/// 将 `raw_dir` 下的所有训练病例预处理为 `{out_dir}/{case_id}.npz`.
///
/// 单个病例的失败不会影响其他病例. 返回值按病例编号排序, 每项为
/// `(病例编号, 输出路径或该病例的错误)`. 仅当目录本身无法读取时返回 `Err`.
pub fn preprocess_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    raw_dir: P,
    out_dir: Q,
    pre: &CasePreprocessor,
) -> Result<Vec<(String, Result<PathBuf>)>> {
    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir)?;
    let cases = find_cases(raw_dir)?;
    log::info!("preprocessing {} cases into {}", cases.len(), out_dir.display());

    let run = |case: &CaseDir| {
        let res = preprocess_one(pre, case, out_dir);
        if let Err(e) = &res {
            log::error!("case {} failed: {e}", case.id());
        }
        (case.id().to_owned(), res)
    };

    #[cfg(feature = "rayon")]
    let report = cases.par_iter().map(run).collect();
    #[cfg(not(feature = "rayon"))]
    let report = cases.iter().map(run).collect();
    Ok(report)
}
