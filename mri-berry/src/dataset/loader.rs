//! 训练/验证数据集划分与批加载器.
//!
//! 提供迭代器风格的批获取模式.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{stack, Array4, Array5, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::ProcessedCase;
use crate::{PipelineError, Result};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 按索引随机访问的病例来源.
pub trait CaseSource: Sync {
    /// 病例个数.
    fn len(&self) -> usize;

    /// 是否为空?
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取第 `index` 个病例.
    fn get(&self, index: usize) -> Result<ProcessedCase>;
}

impl CaseSource for Vec<ProcessedCase> {
    #[inline]
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn get(&self, index: usize) -> Result<ProcessedCase> {
        Ok(self[index].clone())
    }
}

/// 硬盘上的 `.npz` 病例归档集合. 病例在访问时才被读取.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NpzDataset {
    files: Vec<PathBuf>,
}

impl NpzDataset {
    /// 列出 `dir` 下所有 `*.npz` 文件 (按路径排序). 一个都没有时返回
    /// [`PipelineError::EmptyDataset`].
    pub fn discover<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |e| e == "npz") {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(PipelineError::EmptyDataset(dir.display().to_string()));
        }
        files.sort();
        log::info!("found {} processed cases in {}", files.len(), dir.display());
        Ok(Self { files })
    }

    /// 由给定文件列表直接创建.
    #[inline]
    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// 所有归档文件.
    #[inline]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// 以 `seed` 打乱后划分为 `(训练集, 验证集)`. 验证集取打乱后的前
    /// `floor(n * val_fraction)` 个病例.
    pub fn split(&self, val_fraction: f64, seed: u64) -> (NpzDataset, NpzDataset) {
        let mut files = self.files.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        files.shuffle(&mut rng);

        let n_val = ((files.len() as f64 * val_fraction).floor() as usize).min(files.len());
        let train = files.split_off(n_val);
        (Self { files: train }, Self { files })
    }
}

impl CaseSource for NpzDataset {
    #[inline]
    fn len(&self) -> usize {
        self.files.len()
    }

    fn get(&self, index: usize) -> Result<ProcessedCase> {
        ProcessedCase::open(&self.files[index])
    }
}

/// 一个批次: `(B, C, D, H, W)` 影像和 `(B, R, D, H, W)` 区域栈.
#[derive(Clone, Debug)]
pub struct Batch {
    /// 多模态影像.
    pub images: Array5<f32>,

    /// 区域栈.
    pub masks: Array5<f32>,
}

impl Batch {
    /// 批大小.
    #[inline]
    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 沿新的第 0 轴堆叠多个 4D 数组.
fn stack4(arrays: &[ArrayView4<f32>]) -> Result<Array5<f32>> {
    stack(Axis(0), arrays).map_err(|_| {
        let shape = arrays.first().map(|a| a.shape().to_vec()).unwrap_or_default();
        PipelineError::shape("identically shaped cases", &shape)
    })
}

/// 批加载器. 每个病例在一轮中恰好出现一次, 最后一批可能不满.
pub struct BatchLoader<'a, S: CaseSource> {
    source: &'a S,
    batch_size: usize,
    order_rev: Vec<usize>,
}

impl<'a, S: CaseSource> BatchLoader<'a, S> {
    /// 按索引序创建.
    ///
    /// # 注意
    ///
    /// `batch_size` 为 0 时程序 panic.
    pub fn new(source: &'a S, batch_size: usize) -> Self {
        assert_ne!(batch_size, 0, "批大小不能为 0");
        Self {
            source,
            batch_size,
            order_rev: (0..source.len()).rev().collect(),
        }
    }

    /// 以 `seed` 打乱病例顺序.
    pub fn shuffled(mut self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.order_rev.shuffle(&mut rng);
        self
    }

    fn load(&self, indices: &[usize]) -> Result<Vec<ProcessedCase>> {
        #[cfg(feature = "rayon")]
        let cases: Result<Vec<_>> = indices.par_iter().map(|&i| self.source.get(i)).collect();
        #[cfg(not(feature = "rayon"))]
        let cases: Result<Vec<_>> = indices.iter().map(|&i| self.source.get(i)).collect();
        cases
    }
}

impl<'a, S: CaseSource> Iterator for BatchLoader<'a, S> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.order_rev.is_empty() {
            return None;
        }
        let take = self.batch_size.min(self.order_rev.len());
        let at = self.order_rev.len() - take;
        let mut indices = self.order_rev.split_off(at);
        indices.reverse();

        let batch = self.load(&indices).and_then(|cases| {
            let images: Vec<_> = cases.iter().map(|c| c.image.view()).collect();
            let masks: Vec<_> = cases.iter().map(|c| c.mask.view()).collect();
            Ok(Batch {
                images: stack4(&images)?,
                masks: stack4(&masks)?,
            })
        });
        Some(batch)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.len();
        (n, Some(n))
    }
}

impl<'a, S: CaseSource> ExactSizeIterator for BatchLoader<'a, S> {
    #[inline]
    fn len(&self) -> usize {
        (self.order_rev.len() + self.batch_size - 1) / self.batch_size
    }
}

/// 由单个 `(C, D, H, W)` 数组构造批大小为 1 的 `(1, C, D, H, W)` 数组.
#[inline]
pub fn single(image: &Array4<f32>) -> Array5<f32> {
    image.view().insert_axis(Axis(0)).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn toy(n: usize) -> Vec<ProcessedCase> {
        (0..n)
            .map(|i| ProcessedCase {
                image: Array4::from_elem((2, 2, 2, 2), i as f32),
                mask: Array4::from_elem((3, 2, 2, 2), (i % 2) as f32),
            })
            .collect()
    }

    fn seen(loader: BatchLoader<'_, Vec<ProcessedCase>>) -> Vec<usize> {
        let mut ans = Vec::new();
        for batch in loader {
            let batch = batch.unwrap();
            for b in 0..batch.len() {
                ans.push(batch.images[(b, 0, 0, 0, 0)] as usize);
            }
        }
        ans
    }

    #[test]
    fn test_batches_cover_every_case_once() {
        let cases = toy(5);
        let loader = BatchLoader::new(&cases, 2);
        assert_eq!(loader.len(), 3);
        assert_eq!(seen(loader), [0, 1, 2, 3, 4]);

        let mut order = seen(BatchLoader::new(&cases, 2).shuffled(7));
        order.sort();
        assert_eq!(order, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_batch_shape() {
        let cases = toy(3);
        let batch = BatchLoader::new(&cases, 2).next().unwrap().unwrap();
        assert_eq!(batch.images.dim(), (2, 2, 2, 2, 2));
        assert_eq!(batch.masks.dim(), (2, 3, 2, 2, 2));
    }

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let files: Vec<PathBuf> = (0..10).map(|i| PathBuf::from(format!("{i}.npz"))).collect();
        let ds = NpzDataset::from_files(files.clone());
        let (train, val) = ds.split(0.2, 42);
        assert_eq!(val.len(), 2);
        assert_eq!(train.len(), 8);
        assert_eq!(ds.split(0.2, 42), (train.clone(), val.clone()));

        let mut all: Vec<PathBuf> = train.files().iter().chain(val.files()).cloned().collect();
        all.sort();
        let mut expected = files;
        expected.sort();
        assert_eq!(all, expected);

        // floor(3 * 0.2) = 0.
        let (train, val) = NpzDataset::from_files(expected[..3].to_vec()).split(0.2, 1);
        assert!(val.is_empty());
        assert_eq!(train.len(), 3);
    }

    #[test]
    fn test_discover_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NpzDataset::discover(dir.path()),
            Err(PipelineError::EmptyDataset(_))
        ));
    }
}
