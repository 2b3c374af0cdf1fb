use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView, ArrayViewMut, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::{Idx3d, PipelineError, Result, Spacing};

pub mod canonical;
pub mod intensity;
pub mod label;
pub mod resample;

pub use canonical::{center_crop_or_pad, try_center_crop_or_pad};
pub use intensity::{normalize_intensity, IntensityClip};
pub use label::label_stack;
pub use resample::{zoom, Interpolation};

/// 由 header 获取体素分辨率. `pixdim` 按 `[_, W, H, D, ..]` 存储, 返回 `[D, H, W]`.
#[inline]
fn get_spacing_from_header(h: &NiftiHeader) -> Spacing {
    let [_, w, h, d, ..] = h.pixdim;
    [d as f64, h as f64, w as f64]
}

/// 3D 体数据, 包括强度值和体素物理分辨率. 强度值以 `f32` 保存, 按 `(D, H, W)` 访问.
///
/// 分割标签图同样以该结构保存 (标签值被转换为 `f32`).
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<f32>,
    spacing: Spacing,
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for Volume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Volume {
    /// 由 `(D, H, W)` 数据和 `(D, H, W)` 分辨率直接创建.
    ///
    /// `spacing` 各分量应为正数. 该前提由调用者保证, 仅在 debug 模式下检查.
    #[inline]
    pub fn new(data: Array3<f32>, spacing: Spacing) -> Self {
        debug_assert!(spacing.iter().all(|s| *s > 0.0), "非法体素分辨率 {spacing:?}");
        Self { data, spacing }
    }

    /// 打开 nii (或 nii.gz) 文件格式的 3D 体数据. `path` 为文件的本地路径.
    ///
    /// 文件不存在、无法读取或并非合法的 3D 体数据时返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let spacing = get_spacing_from_header(obj.header());

        let data = obj.into_volume().into_ndarray::<f32>()?;
        let shape = data.shape().to_vec();
        // [W, H, D] -> [D, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|_| PipelineError::shape("a 3D volume", &shape))?
            .reversed_axes();

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };

        log::debug!(
            "loaded {} with shape {:?}, spacing {spacing:?}",
            path.as_ref().display(),
            data.dim()
        );
        Ok(Self { data, spacing })
    }

    /// 将体数据连同分辨率写入 nii 文件. 路径以 `.gz` 结尾时自动压缩.
    ///
    /// 写入时按 nifti 惯例将轴序恢复为 `(W, H, D)`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut header = NiftiHeader::default();
        let [d, h, w] = self.spacing;
        header.pixdim[1] = w as f32;
        header.pixdim[2] = h as f32;
        header.pixdim[3] = d as f32;
        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&self.data.view().reversed_axes())?;
        Ok(())
    }

    /// 获取数据形状大小.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取数据体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 获取单个体素分辨率. 以毫米为单位, 按 `(D, H, W)` 组织.
    #[inline]
    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    pub fn is_isotropic(&self) -> bool {
        let [d, h, w] = self.spacing;
        d == h && d == w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    pub fn voxel(&self) -> f64 {
        self.spacing.iter().product()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix3> {
        self.data.view_mut()
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array3<f32> {
        self.data
    }

    /// 按 `target` 分辨率进行线性插值重采样, 返回新的体数据. 不修改 `self`.
    ///
    /// 每个轴的缩放系数为 `spacing / target`, 输出长度为 `round(len * factor)`.
    ///
    /// # 注意
    ///
    /// 不会对极端缩放系数做任何限制. `target` 含零或负分量时结果无意义,
    /// 调用者应事先校验.
    #[inline]
    pub fn resample(&self, target: Spacing) -> Volume {
        self.resample_with(target, Interpolation::Linear)
    }

    /// 按 `target` 分辨率和指定插值方式重采样. 语义同 [`Volume::resample`].
    pub fn resample_with(&self, target: Spacing, interp: Interpolation) -> Volume {
        let factors = [
            self.spacing[0] / target[0],
            self.spacing[1] / target[1],
            self.spacing[2] / target[2],
        ];
        Volume {
            data: zoom(self.data.view(), factors, interp),
            spacing: target,
        }
    }

    /// 截断到 `clip` 区间后做零均值单位方差归一化, 返回新的体数据.
    #[inline]
    pub fn normalized(&self, clip: IntensityClip) -> Volume {
        Volume {
            data: normalize_intensity(self.data.view(), clip),
            spacing: self.spacing,
        }
    }
}
