//! 单个 BraTS 病例目录的发现与预处理.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{stack, Array3, Array4, Axis};

use crate::config::LabelResampling;
use crate::consts::{MODALITIES, REGIONS, SEGMENTATION};
use crate::data::{center_crop_or_pad, label_stack, Interpolation, Volume};
use crate::{PipelineConfig, PipelineError, Result, Spacing};

/// 病例目录. 目录中每个模态恰有一个名称形如 `*_{modality}.*` 的文件,
/// 训练病例另有恰好一个 `*_seg.*` 文件.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CaseDir {
    id: String,
    path: PathBuf,
}

impl CaseDir {
    /// 由目录路径创建. 病例编号为目录名.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_owned();
        let id = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { id, path }
    }

    /// 病例编号.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 病例目录路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 目录中文件名包含 `_{marker}.` 的所有文件, 按文件名排序.
    fn matching(&self, marker: &str) -> Result<Vec<PathBuf>> {
        let pattern = format!("_{marker}.");
        let mut ans = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().contains(&pattern) {
                ans.push(entry.path());
            }
        }
        ans.sort();
        Ok(ans)
    }

    /// 获取模态 `modality` 的唯一文件. 匹配到 0 个或多个文件时返回
    /// [`PipelineError::MissingModality`].
    pub fn modality_path(&self, modality: &str) -> Result<PathBuf> {
        let mut found = self.matching(modality)?;
        if found.len() != 1 {
            return Err(PipelineError::MissingModality {
                modality: modality.to_owned(),
                found: found.len(),
                case_dir: self.path.clone(),
            });
        }
        Ok(found.swap_remove(0))
    }

    /// 按 [`MODALITIES`] 顺序获取所有模态文件.
    pub fn modality_paths(&self) -> Result<Vec<PathBuf>> {
        MODALITIES.iter().map(|m| self.modality_path(m)).collect()
    }

    /// 获取唯一的分割文件. 匹配到 0 个或多个文件时返回 [`PipelineError::MissingLabel`].
    pub fn segmentation_path(&self) -> Result<PathBuf> {
        let mut found = self.matching(SEGMENTATION)?;
        if found.len() != 1 {
            return Err(PipelineError::MissingLabel {
                found: found.len(),
                case_dir: self.path.clone(),
            });
        }
        Ok(found.swap_remove(0))
    }
}

/// 列出 `raw_dir` 下的所有病例目录, 按路径排序.
pub fn find_cases<P: AsRef<Path>>(raw_dir: P) -> Result<Vec<CaseDir>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(raw_dir.as_ref())? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs.into_iter().map(CaseDir::new).collect())
}

/// 预处理模式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    /// 同时处理分割标签.
    Training,

    /// 只处理影像.
    Inference,
}

/// 预处理完成的病例.
#[derive(Clone, Debug)]
pub struct PreparedCase {
    /// 病例编号.
    pub id: String,

    /// `(C, D, H, W)` 多模态体数据, 通道顺序同 [`MODALITIES`].
    pub image: Array4<f32>,

    /// `(R, D, H, W)` 区域栈, 通道顺序同 [`REGIONS`]. 推理模式下为 `None`.
    pub mask: Option<Array4<f32>>,

    /// 第一个模态的原始体素分辨率.
    pub spacing: Spacing,
}

/// 病例预处理器: 读取 -> 重采样 -> 逐模态归一化 -> 堆叠 -> 形状规范化.
#[derive(Clone, Debug, Default)]
pub struct CasePreprocessor {
    cfg: PipelineConfig,
}

impl CasePreprocessor {
    /// 以给定配置创建.
    #[inline]
    pub fn new(cfg: PipelineConfig) -> Self {
        Self { cfg }
    }

    /// 当前配置.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// 读取、重采样并归一化单个模态.
    fn load_modality(&self, path: &Path) -> Result<(Array3<f32>, Spacing)> {
        let vol = Volume::open(path)?;
        let spacing = vol.spacing();
        let vol = vol
            .resample(self.cfg.target_spacing)
            .normalized(self.cfg.intensity_clip);
        Ok((vol.into_raw(), spacing))
    }

    /// 形状规范化之前的多模态堆叠.
    fn stack_modalities<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> Result<(Array4<f32>, Spacing)> {
        #[cfg(feature = "rayon")]
        let loaded = {
            use rayon::prelude::*;
            paths
                .par_iter()
                .map(|p| self.load_modality(p.as_ref()))
                .collect::<Result<Vec<_>>>()?
        };
        #[cfg(not(feature = "rayon"))]
        let loaded = paths
            .iter()
            .map(|p| self.load_modality(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let Some((first, spacing)) = loaded.first() else {
            return Err(PipelineError::shape("at least one modality", &[0]));
        };
        let spacing = *spacing;
        let shape = first.shape().to_vec();
        if let Some((bad, _)) = loaded.iter().find(|(v, _)| v.shape() != shape.as_slice()) {
            return Err(PipelineError::shape(format!("every modality shaped {shape:?}"), bad.shape()));
        }

        let views: Vec<_> = loaded.iter().map(|(v, _)| v.view()).collect();
        let image = stack(Axis(0), &views).map_err(|_| PipelineError::shape("stackable modalities", &shape))?;
        Ok((image, spacing))
    }

    /// 形状规范化之前的区域栈.
    fn stack_label(&self, path: &Path) -> Result<Array4<f32>> {
        let interp = match self.cfg.label_resampling {
            LabelResampling::Nearest => Interpolation::Nearest,
            LabelResampling::Linear => Interpolation::Linear,
        };
        let seg = Volume::open(path)?.resample_with(self.cfg.target_spacing, interp);
        Ok(label_stack(seg.data(), &REGIONS))
    }

    /// 处理一组模态文件, 返回规范化后的 `(C, D, H, W)` 数据和第一个模态的原始分辨率.
    ///
    /// 各模态重采样后的形状不一致时返回 [`PipelineError::ShapeMismatch`].
    pub fn process_modalities<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> Result<(Array4<f32>, Spacing)> {
        let (image, spacing) = self.stack_modalities(paths)?;
        Ok((center_crop_or_pad(image.view(), self.cfg.patch_size), spacing))
    }

    /// 处理分割文件, 返回规范化后的 `(R, D, H, W)` 区域栈.
    pub fn process_label<P: AsRef<Path>>(&self, path: P) -> Result<Array4<f32>> {
        let mask = self.stack_label(path.as_ref())?;
        Ok(center_crop_or_pad(mask.view(), self.cfg.patch_size))
    }

    /// 处理整个病例目录. 任一文件缺失、重复或损坏时整个病例失败.
    /// 分割图重采样后的网格与模态网格不一致时返回 [`PipelineError::ShapeMismatch`].
    pub fn process_case(&self, case: &CaseDir, mode: Mode) -> Result<PreparedCase> {
        let paths = case.modality_paths()?;
        let seg_path = match mode {
            Mode::Training => Some(case.segmentation_path()?),
            Mode::Inference => None,
        };

        let (image, spacing) = self.stack_modalities(&paths)?;
        let mask = match seg_path {
            Some(p) => {
                let mask = self.stack_label(&p)?;
                if mask.shape()[1..] != image.shape()[1..] {
                    return Err(PipelineError::shape(
                        format!("label grid {:?} of case {}", &image.shape()[1..], case.id()),
                        &mask.shape()[1..],
                    ));
                }
                Some(center_crop_or_pad(mask.view(), self.cfg.patch_size))
            }
            None => None,
        };
        let image = center_crop_or_pad(image.view(), self.cfg.patch_size);

        log::info!("case {} -> image {:?}", case.id(), image.dim());
        Ok(PreparedCase {
            id: case.id().to_owned(),
            image,
            mask,
            spacing,
        })
    }
}
