use std::fs::File;
use std::path::Path;

use ndarray::{Array4, Ix4, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};

use crate::{PipelineError, Result};

const IMAGE: &str = "image";
const MASK: &str = "mask";

/// 预处理完成的单个病例归档 (`.npz`), 含两个命名数组:
/// `image` (`(C, D, H, W)`) 和 `mask` (`(R, D, H, W)`).
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedCase {
    /// 多模态体数据.
    pub image: Array4<f32>,

    /// 区域栈.
    pub mask: Array4<f32>,
}

impl ProcessedCase {
    /// 以压缩格式写入 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut npz = NpzWriter::new_compressed(File::create(path.as_ref())?);
        npz.add_array(IMAGE, &self.image)?;
        npz.add_array(MASK, &self.mask)?;
        npz.finish()?;
        Ok(())
    }

    /// 从 `path` 读取. 两个数组的空间形状必须一致.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut npz = NpzReader::new(File::open(path.as_ref())?)?;
        let names = npz.names()?;
        let image = read_named(&mut npz, &names, IMAGE)?;
        let mask = read_named(&mut npz, &names, MASK)?;
        if image.shape()[1..] != mask.shape()[1..] {
            return Err(PipelineError::shape(
                format!("mask grid {:?}", &image.shape()[1..]),
                mask.shape(),
            ));
        }
        Ok(Self { image, mask })
    }
}

/// 归档内条目名可能带有 `.npy` 后缀, 按去掉后缀后的名称查找.
fn read_named(npz: &mut NpzReader<File>, names: &[String], name: &str) -> Result<Array4<f32>> {
    let entry = names
        .iter()
        .find(|n| n.trim_end_matches(".npy") == name)
        .map(String::as_str)
        .unwrap_or(name);
    Ok(npz.by_name::<OwnedRepr<f32>, Ix4>(entry)?)
}
