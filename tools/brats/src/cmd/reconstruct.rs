use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::{Args, ValueEnum};
use mri_berry::prelude::*;
use ndarray::{Array3, Array4, Axis};
use ndarray_npy::read_npy;

/// 重建的区域.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum RegionArg {
    /// 全肿瘤.
    Wt,
    /// 肿瘤核心.
    Tc,
    /// 增强肿瘤.
    Et,
}

impl From<RegionArg> for Region {
    fn from(r: RegionArg) -> Self {
        match r {
            RegionArg::Wt => Region::WholeTumor,
            RegionArg::Tc => Region::TumorCore,
            RegionArg::Et => Region::EnhancingTumor,
        }
    }
}

#[derive(Args, Debug)]
pub struct Reconstruct {
    /// `(R, D, H, W)` 区域栈或 `(D, H, W)` 掩膜 (`.npy`).
    mask: PathBuf,

    /// 区域栈中要重建的区域. 对 3D 掩膜无效.
    #[arg(short, long, value_enum, default_value_t = RegionArg::Wt)]
    region: RegionArg,

    /// 等值面.
    #[arg(long, default_value_t = 0.5)]
    iso: f32,

    /// 输出目录. 缺省时与掩膜文件相同.
    #[arg(long = "out-dir", short = 'o')]
    out_dir: Option<PathBuf>,
}

impl Reconstruct {
    pub fn run(self) -> Result<()> {
        let volume: Array3<f32> = match read_npy::<_, Array4<f32>>(&self.mask) {
            Ok(stack) => {
                let channel = Region::from(self.region).channel();
                ensure!(
                    channel < stack.len_of(Axis(0)),
                    "{} has no channel {channel}",
                    self.mask.display()
                );
                stack.index_axis_move(Axis(0), channel)
            }
            Err(_) => read_npy(&self.mask).with_context(|| format!("reading {}", self.mask.display()))?,
        };

        let mesh = marching_cubes(volume.view(), self.iso);
        if mesh.is_empty() {
            log::warn!("no surface at level {} in {}", self.iso, self.mask.display());
        }

        let base = self
            .mask
            .file_stem()
            .with_context(|| format!("{} has no file name", self.mask.display()))?;
        let out_dir = match self.out_dir {
            Some(d) => d,
            None => self.mask.parent().map(PathBuf::from).unwrap_or_default(),
        };
        std::fs::create_dir_all(&out_dir)?;
        let obj = out_dir.join(base).with_extension("obj");
        let stl = out_dir.join(base).with_extension("stl");
        mesh.save_obj(&obj)?;
        mesh.save_stl(&stl)?;
        println!(
            "{} vertices, {} faces -> {}, {}",
            mesh.vertices().len(),
            mesh.faces().len(),
            obj.display(),
            stl.display()
        );
        Ok(())
    }
}
