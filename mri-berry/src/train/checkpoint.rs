use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::Result;

/// 最优检查点: 模型状态 (含优化器状态) 以及取得该状态的轮次与验证 Dice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    /// 轮次, 从 1 开始.
    pub epoch: u32,

    /// 验证集平均 hard Dice.
    pub val_dice: f64,

    /// 模型状态.
    pub model_state: S,
}

impl<S: Serialize> Checkpoint<S> {
    /// 原子地写入 `path`: 先写入同目录下的临时文件, 再 rename 覆盖.
    ///
    /// 写入过程中崩溃不会破坏已有的检查点.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            bincode::serialize_into(&mut w, self)?;
            w.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl<S: DeserializeOwned> Checkpoint<S> {
    /// 从 `path` 读取.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(bincode::deserialize_from(reader)?)
    }
}
