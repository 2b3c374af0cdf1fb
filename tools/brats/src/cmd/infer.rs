use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use mri_berry::consts::{MODALITIES, REGIONS};
use mri_berry::loss::dice_coefficient;
use mri_berry::prelude::*;
use ndarray::Axis;
use utils::loader;

use super::{dir_or, heading, load_predictor, PipelineArgs};

#[derive(Args, Debug)]
pub struct Infer {
    /// 病例目录.
    case_dir: PathBuf,

    /// 检查点路径. 缺省时取结果目录下的 `unet3d_best.ckpt`.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// 输出目录. 缺省时取 `$BRATS_RESULTS_DIR` 或 `$HOME/dataset/brats/results`.
    #[arg(long = "out-dir", short = 'o')]
    out_dir: Option<PathBuf>,

    /// 可视化的轴向切片个数.
    #[arg(long, default_value_t = 8)]
    slices: usize,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl Infer {
    pub fn run(self) -> Result<()> {
        let cfg = self.pipeline.config()?;
        let out_dir = dir_or(self.out_dir, loader::results_dir_from_env_or_home, "output directory")?;
        fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
        let predictor = load_predictor(self.checkpoint, cfg)?;

        let case = CaseDir::new(&self.case_dir);
        let (prepared, prediction) = predictor.predict_case(&case)?;
        let id = &prepared.id;

        let mask_path = out_dir.join(format!("{id}_mask.npy"));
        ndarray_npy::write_npy(&mask_path, &prediction.mask)?;

        // 有真值时顺带给出各区域的 Dice.
        let truth = match case.segmentation_path() {
            Ok(p) => Some(predictor.preprocessor().process_label(p)?),
            Err(_) => None,
        };

        heading(&format!("case {id}"))?;
        println!("mask -> {}", mask_path.display());
        for r in REGIONS {
            let region = prediction.region_mask(r);
            let voxels = region.iter().filter(|v| **v > 0.0).count();
            let mesh = mask_to_mesh(region);
            let mesh_note = if mesh.is_empty() {
                "no surface".to_owned()
            } else {
                let path = out_dir.join(format!("{id}_{}.obj", r.name()));
                mesh.save_obj(&path)?;
                format!("{} faces -> {}", mesh.faces().len(), path.display())
            };
            match &truth {
                Some(t) => {
                    let dice = dice_coefficient(region, t.index_axis(Axis(0), r.channel()));
                    println!("  {}: {voxels} voxels, dice {dice:.4}, {mesh_note}", r.name());
                }
                None => println!("  {}: {voxels} voxels, {mesh_note}", r.name()),
            }
        }

        let flair = MODALITIES.iter().position(|m| *m == "flair").unwrap_or(0);
        let overlay = out_dir.join(format!("{id}_overlay.png"));
        save_overlay_grid(
            prepared.image.index_axis(Axis(0), flair),
            prediction.region_mask(Region::WholeTumor),
            &overlay,
            self.slices,
        )?;
        println!("  overlay -> {}", overlay.display());
        heading("")?;
        Ok(())
    }
}
