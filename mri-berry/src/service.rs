//! 上传文件边界: 四个模态文件 -> 预处理 -> 推理 -> 掩膜与网格.
//!
//! 不包含任何网络传输层. 调用者负责把 multipart 请求拆成 `模态名 -> 字节` 的映射,
//! 并把 [`ServiceError`] 转换为相应的响应.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::consts::{Region, MODALITIES};
use crate::infer::Predictor;
use crate::mesh::mask_to_mesh;
use crate::model::SegmentationModel;
use crate::PipelineError;

/// 掩膜输出文件名.
pub const MASK_FILE: &str = "api_mask.npy";

/// 网格输出文件名.
pub const MESH_FILE: &str = "api_mesh.obj";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// 边界错误.
#[derive(Debug)]
pub enum ServiceError {
    /// 请求本身不合法 (缺少模态或文件为空), 对应客户端错误.
    BadRequest(String),

    /// 处理过程中的内部错误.
    Internal(PipelineError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BadRequest(_) => None,
            Self::Internal(e) => Some(e),
        }
    }
}

impl From<PipelineError> for ServiceError {
    #[inline]
    fn from(e: PipelineError) -> Self {
        Self::Internal(e)
    }
}

impl From<std::io::Error> for ServiceError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.into())
    }
}

/// 成功响应.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PredictResponse {
    /// `(R, D, H, W)` 二值掩膜 (`.npy`).
    pub mask_path: PathBuf,

    /// 全肿瘤区域的网格 (`.obj`).
    pub mesh_path: PathBuf,

    /// 没有真值, 恒为 `None`.
    pub dice_estimate: Option<f64>,
}

/// 检查四个模态是否都已上传且非空, 按 [`MODALITIES`] 顺序返回.
fn collect_uploads(uploads: &HashMap<String, Vec<u8>>) -> Result<Vec<(&'static str, &[u8])>, ServiceError> {
    MODALITIES
        .iter()
        .map(|&m| match uploads.get(m) {
            None => Err(ServiceError::BadRequest(format!(
                "upload four files named {}; `{m}` is missing",
                MODALITIES.join(", ")
            ))),
            Some(bytes) if bytes.is_empty() => Err(ServiceError::BadRequest(format!("empty upload for `{m}`"))),
            Some(bytes) => Ok((m, bytes.as_slice())),
        })
        .collect()
}

/// 处理一次上传: 将四个模态暂存为 BraTS 风格的文件名, 预处理并推理,
/// 再对全肿瘤区域做三维重建. 结果写入 `results_dir` 下的 [`MASK_FILE`] 与 [`MESH_FILE`].
///
/// 上传内容以 gzip 魔数开头时按 `.nii.gz` 暂存, 否则按 `.nii` 暂存.
pub fn predict_upload<M: SegmentationModel, P: AsRef<Path>>(
    uploads: &HashMap<String, Vec<u8>>,
    predictor: &Predictor<M>,
    results_dir: P,
) -> Result<PredictResponse, ServiceError> {
    let files = collect_uploads(uploads)?;

    let staging = tempfile::tempdir()?;
    let mut paths = Vec::with_capacity(files.len());
    for (m, bytes) in files {
        let ext = if bytes.starts_with(&GZIP_MAGIC) { "nii.gz" } else { "nii" };
        let path = staging.path().join(format!("case_{m}.{ext}"));
        fs::write(&path, bytes)?;
        paths.push(path);
    }

    let (_, prediction) = predictor.predict_files(&paths)?;
    let mesh = mask_to_mesh(prediction.region_mask(Region::WholeTumor));

    let results_dir = results_dir.as_ref();
    fs::create_dir_all(results_dir)?;
    let mask_path = results_dir.join(MASK_FILE);
    let mesh_path = results_dir.join(MESH_FILE);
    ndarray_npy::write_npy(&mask_path, &prediction.mask).map_err(PipelineError::from)?;
    mesh.save_obj(&mesh_path)?;

    log::info!(
        "upload processed: {} faces, results in {}",
        mesh.faces().len(),
        results_dir.display()
    );
    Ok(PredictResponse {
        mask_path,
        mesh_path,
        dice_estimate: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_or_empty_upload_is_bad_request() {
        let mut uploads = HashMap::new();
        for m in ["t1", "t1ce", "t2"] {
            uploads.insert(m.to_owned(), vec![1u8]);
        }
        assert!(matches!(collect_uploads(&uploads), Err(ServiceError::BadRequest(_))));

        uploads.insert("flair".to_owned(), vec![]);
        match collect_uploads(&uploads) {
            Err(ServiceError::BadRequest(msg)) => assert!(msg.contains("flair")),
            other => panic!("unexpected {other:?}"),
        }

        uploads.insert("flair".to_owned(), vec![2u8]);
        let files = collect_uploads(&uploads).unwrap();
        assert_eq!(files.iter().map(|(m, _)| *m).collect::<Vec<_>>(), MODALITIES);
    }
}
