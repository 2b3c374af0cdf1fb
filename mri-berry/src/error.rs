//! 运行时错误.

use ndarray_npy::{ReadNpzError, WriteNpyError, WriteNpzError};
use std::fmt;
use std::path::PathBuf;

/// 流水线运行时错误.
///
/// 除训练循环外, 任一错误都只会中止当前病例 (或当前请求), 不会尝试部分恢复.
#[derive(Debug)]
pub enum PipelineError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// nifti 文件缺失、损坏或格式非法.
    Nifti(nifti::NiftiError),

    /// 读取 npz 归档错误.
    ReadNpz(ReadNpzError),

    /// 写入 npz 归档错误.
    WriteNpz(WriteNpzError),

    /// 写入 npy 文件错误.
    WriteNpy(WriteNpyError),

    /// 写入图像错误.
    Image(image::ImageError),

    /// 检查点编码/解码错误.
    Checkpoint(bincode::Error),

    /// 病例目录中某模态的文件个数不是恰好一个.
    MissingModality {
        /// 模态名称.
        modality: String,

        /// 实际匹配到的文件个数.
        found: usize,

        /// 病例目录.
        case_dir: PathBuf,
    },

    /// 训练模式下病例目录中分割文件的个数不是恰好一个.
    MissingLabel {
        /// 实际匹配到的文件个数.
        found: usize,

        /// 病例目录.
        case_dir: PathBuf,
    },

    /// 输入维度或形状不符合要求.
    ShapeMismatch {
        /// 期望的形状描述.
        expected: String,

        /// 实际形状.
        found: Vec<usize>,
    },

    /// 分割模型拒绝了输入或状态.
    Model(String),

    /// 数据集 (目录或划分) 为空.
    EmptyDataset(String),
}

/// 本 crate 的 `Result`.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// 构造 [`PipelineError::ShapeMismatch`].
    pub(crate) fn shape(expected: impl Into<String>, found: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            found: found.to_vec(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Nifti(e) => write!(f, "nifti error: {e}"),
            Self::ReadNpz(e) => write!(f, "reading npz: {e}"),
            Self::WriteNpz(e) => write!(f, "writing npz: {e}"),
            Self::WriteNpy(e) => write!(f, "writing npy: {e}"),
            Self::Image(e) => write!(f, "writing image: {e}"),
            Self::Checkpoint(e) => write!(f, "checkpoint: {e}"),
            Self::MissingModality {
                modality,
                found,
                case_dir,
            } => write!(
                f,
                "expected exactly one `{modality}` file in {}, found {found}",
                case_dir.display()
            ),
            Self::MissingLabel { found, case_dir } => write!(
                f,
                "expected exactly one segmentation file in {}, found {found}",
                case_dir.display()
            ),
            Self::ShapeMismatch { expected, found } => {
                write!(f, "shape mismatch: expected {expected}, found {found:?}")
            }
            Self::Model(msg) => write!(f, "model error: {msg}"),
            Self::EmptyDataset(what) => write!(f, "no cases found in {what}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Nifti(e) => Some(e),
            Self::ReadNpz(e) => Some(e),
            Self::WriteNpz(e) => Some(e),
            Self::WriteNpy(e) => Some(e),
            Self::Image(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($err: ty => $variant: ident),+ $(,)?) => {
        $(
            impl From<$err> for PipelineError {
                #[inline]
                fn from(e: $err) -> Self {
                    Self::$variant(e)
                }
            }
        )+
    };
}

impl_from!(
    std::io::Error => Io,
    nifti::NiftiError => Nifti,
    ReadNpzError => ReadNpz,
    WriteNpzError => WriteNpz,
    WriteNpyError => WriteNpy,
    image::ImageError => Image,
    bincode::Error => Checkpoint,
);
