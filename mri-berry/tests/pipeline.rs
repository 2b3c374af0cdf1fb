use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use mri_berry::consts::{Region, MODALITIES, REGIONS, SEGMENTATION};
use mri_berry::data::center_crop_or_pad;
use mri_berry::mesh::{mask_to_mesh, Mesh};
use mri_berry::model::PointwiseState;
use mri_berry::prelude::*;
use mri_berry::service::{predict_upload, ServiceError, MASK_FILE, MESH_FILE};
use ndarray::{Array3, Array4, Axis, Zip};

fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init();
}

/// 以体数据中心为球心的同心球标签: 内核为 ET, 中间为 NCR, 外壳为 ED.
fn synthetic_label(shape: Idx3d, radius: f32) -> Array3<f32> {
    let (d, h, w) = shape;
    let c = [d as f32 / 2.0, h as f32 / 2.0, w as f32 / 2.0];
    Array3::from_shape_fn(shape, |(i, j, k)| {
        let r = ((i as f32 - c[0]).powi(2) + (j as f32 - c[1]).powi(2) + (k as f32 - c[2]).powi(2)).sqrt();
        if r < radius * 0.4 {
            4.0
        } else if r < radius * 0.7 {
            1.0
        } else if r < radius {
            2.0
        } else {
            0.0
        }
    })
}

/// 肿瘤内部更亮的合成模态强度.
fn synthetic_modality(label: &Array3<f32>, channel: usize) -> Array3<f32> {
    let base = 100.0 * (channel + 1) as f32;
    Array3::from_shape_fn(label.dim(), |(i, j, k)| {
        let texture = ((i * 7 + j * 3 + k) % 5) as f32 * 10.0;
        let tumor = if label[(i, j, k)] > 0.0 { 800.0 } else { 0.0 };
        base + texture + tumor
    })
}

/// 在 `root/{id}` 下写入一个 BraTS 风格的病例目录.
fn write_case(root: &Path, id: &str, shape: Idx3d, spacing: Spacing, with_seg: bool) -> PathBuf {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    let radius = shape.0.min(shape.1).min(shape.2) as f32 / 3.0;
    let label = synthetic_label(shape, radius);
    for (c, m) in MODALITIES.iter().enumerate() {
        Volume::new(synthetic_modality(&label, c), spacing)
            .save(dir.join(format!("{id}_{m}.nii.gz")))
            .unwrap();
    }
    if with_seg {
        Volume::new(label, spacing)
            .save(dir.join(format!("{id}_{SEGMENTATION}.nii.gz")))
            .unwrap();
    }
    dir
}

fn is_binary(a: &Array4<f32>) -> bool {
    a.iter().all(|v| *v == 0.0 || *v == 1.0)
}

/// 区域栈满足 ET ⊂ TC ⊂ WT.
fn regions_nested(mask: &Array4<f32>) -> bool {
    let wt = mask.index_axis(Axis(0), Region::WholeTumor.channel());
    let tc = mask.index_axis(Axis(0), Region::TumorCore.channel());
    let et = mask.index_axis(Axis(0), Region::EnhancingTumor.channel());
    Zip::from(&wt).and(&tc).and(&et).all(|&w, &t, &e| e <= t && t <= w)
}

#[test]
fn test_anisotropic_case_is_resampled_then_cropped_and_padded() {
    init_logger();
    let raw = tempfile::tempdir().unwrap();
    let dir = write_case(raw.path(), "BraTS_001", (64, 64, 64), [1.0, 2.0, 2.0], true);
    let case = CaseDir::new(&dir);

    // 重采样后为 (64, 128, 128); H 轴被裁剪, W 轴被填充.
    let t1 = Volume::open(case.modality_path("t1").unwrap()).unwrap();
    assert_eq!(t1.spacing(), [1.0, 2.0, 2.0]);
    let resampled = t1.resample([1.0, 1.0, 1.0]);
    assert_eq!(resampled.shape(), (64, 128, 128));

    let patch = (64, 96, 160);
    let cfg = PipelineConfig::default().with_patch_size(patch);
    let pre = CasePreprocessor::new(cfg.clone());
    let prepared = pre.process_case(&case, Mode::Training).unwrap();

    assert_eq!(prepared.id, "BraTS_001");
    assert_eq!(prepared.spacing, [1.0, 2.0, 2.0]);
    assert_eq!(prepared.image.dim(), (MODALITIES.len(), 64, 96, 160));

    let expected = center_crop_or_pad(
        resampled
            .normalized(cfg.intensity_clip)
            .into_raw()
            .insert_axis(Axis(0))
            .view(),
        patch,
    );
    let got = prepared.image.slice(ndarray::s![0..1, .., .., ..]);
    let max_diff = Zip::from(&got)
        .and(&expected)
        .fold(0.0f32, |acc, &a, &b| acc.max((a - b).abs()));
    assert!(max_diff < 1e-4, "max diff {max_diff}");

    // W 轴两侧各填充 16 个零.
    assert!(prepared.image.slice(ndarray::s![.., .., .., 0..16]).iter().all(|v| *v == 0.0));
    assert!(prepared.image.slice(ndarray::s![.., .., .., 144..]).iter().all(|v| *v == 0.0));

    let mask = prepared.mask.unwrap();
    assert_eq!(mask.dim(), (REGIONS.len(), 64, 96, 160));
    assert!(is_binary(&mask));
    assert!(regions_nested(&mask));
    for r in REGIONS {
        assert!(mask.index_axis(Axis(0), r.channel()).sum() > 0.0, "empty {}", r.name());
    }
}

#[test]
fn test_label_channels_follow_region_definitions() {
    let raw = tempfile::tempdir().unwrap();
    let shape = (10, 10, 10);
    let dir = write_case(raw.path(), "c", shape, [1.0, 1.0, 1.0], true);
    let pre = CasePreprocessor::new(PipelineConfig::default().with_patch_size(shape));
    let mask = pre.process_label(CaseDir::new(&dir).segmentation_path().unwrap()).unwrap();

    let label = synthetic_label(shape, 10.0 / 3.0);
    for r in REGIONS {
        let expected = label.mapv(|v| if r.predicate()(v) { 1.0 } else { 0.0 });
        assert_eq!(mask.index_axis(Axis(0), r.channel()), expected.view());
    }
}

#[test]
fn test_missing_and_duplicated_files_fail_the_case() {
    let raw = tempfile::tempdir().unwrap();
    let pre = CasePreprocessor::new(PipelineConfig::default().with_patch_size((6, 6, 6)));

    let dir = write_case(raw.path(), "missing", (6, 6, 6), [1.0, 1.0, 1.0], true);
    fs::remove_file(dir.join("missing_flair.nii.gz")).unwrap();
    match pre.process_case(&CaseDir::new(&dir), Mode::Training) {
        Err(PipelineError::MissingModality { modality, found, .. }) => {
            assert_eq!(modality, "flair");
            assert_eq!(found, 0);
        }
        other => panic!("unexpected {other:?}"),
    }

    let dir = write_case(raw.path(), "dup", (6, 6, 6), [1.0, 1.0, 1.0], true);
    fs::copy(dir.join("dup_t2.nii.gz"), dir.join("dup_copy_t2.nii.gz")).unwrap();
    assert!(matches!(
        pre.process_case(&CaseDir::new(&dir), Mode::Training),
        Err(PipelineError::MissingModality { found: 2, .. })
    ));

    let dir = write_case(raw.path(), "unlabeled", (6, 6, 6), [1.0, 1.0, 1.0], false);
    let case = CaseDir::new(&dir);
    assert!(matches!(
        pre.process_case(&case, Mode::Training),
        Err(PipelineError::MissingLabel { found: 0, .. })
    ));
    let prepared = pre.process_case(&case, Mode::Inference).unwrap();
    assert!(prepared.mask.is_none());
    assert_eq!(prepared.image.dim(), (4, 6, 6, 6));
}

#[test]
fn test_preprocess_train_and_predict_end_to_end() {
    init_logger();
    let raw = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let shape = (12, 12, 12);
    for id in ["BraTS_001", "BraTS_002", "BraTS_003"] {
        write_case(raw.path(), id, shape, [1.0, 1.0, 1.0], true);
    }
    let broken = write_case(raw.path(), "BraTS_004", shape, [1.0, 1.0, 1.0], true);
    fs::remove_file(broken.join("BraTS_004_t1ce.nii.gz")).unwrap();

    let cfg = PipelineConfig::default().with_patch_size((8, 8, 8));
    let processed_dir = work.path().join("processed");
    let report = preprocess_dataset(raw.path(), &processed_dir, &CasePreprocessor::new(cfg.clone())).unwrap();
    let ids: Vec<_> = report.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["BraTS_001", "BraTS_002", "BraTS_003", "BraTS_004"]);
    assert!(report[..3].iter().all(|(_, r)| r.is_ok()));
    assert!(matches!(report[3].1, Err(PipelineError::MissingModality { .. })));

    let case = ProcessedCase::open(processed_dir.join("BraTS_001.npz")).unwrap();
    assert_eq!(case.image.dim(), (4, 8, 8, 8));
    assert_eq!(case.mask.dim(), (3, 8, 8, 8));

    let dataset = NpzDataset::discover(&processed_dir).unwrap();
    assert_eq!(dataset.len(), 3);
    let (train, val) = dataset.split(0.34, 7);
    assert_eq!((train.len(), val.len()), (2, 1));

    let ckpt_path = work.path().join(mri_berry::consts::BEST_CHECKPOINT);
    let train_cfg = TrainConfig::default()
        .with_epochs(5)
        .with_batch_size(2)
        .with_learning_rate(0.05);
    let model = PointwiseModel::new(4, 3, AdamW::new(train_cfg.learning_rate, 0.0));
    let mut trainer = Trainer::new(model, train_cfg, &ckpt_path);
    let reports = trainer.fit(&train, &val).unwrap();

    assert_eq!(reports.len(), 5);
    assert!(reports[0].saved);
    assert!(reports.last().unwrap().train.loss < reports[0].train.loss);
    let best = reports.iter().map(|r| r.val.dice).fold(f64::MIN, f64::max);
    assert_eq!(trainer.best_dice(), Some(best));
    let ckpt = Checkpoint::<PointwiseState>::load(&ckpt_path).unwrap();
    assert_eq!(ckpt.val_dice, best);
    let ckpt_bytes = fs::read(&ckpt_path).unwrap();

    let predictor = Predictor::from_checkpoint(
        PointwiseModel::new(4, 3, AdamW::new(1e-4, 0.0)),
        &ckpt_path,
        cfg,
    )
    .unwrap();
    assert_eq!(predictor.model().weight(), &ckpt.model_state.weight);

    let cases = find_cases(raw.path()).unwrap();
    let (prepared, prediction) = predictor.predict_case(&cases[0]).unwrap();
    assert_eq!(prepared.image.dim(), (4, 8, 8, 8));
    assert_eq!(prediction.probabilities.dim(), (3, 8, 8, 8));
    assert!(prediction.probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    assert!(is_binary(&prediction.mask));
    assert_eq!(fs::read(&ckpt_path).unwrap(), ckpt_bytes);

    let mesh = mask_to_mesh(prediction.region_mask(Region::WholeTumor));
    let obj = work.path().join("case.obj");
    mesh.save_obj(&obj).unwrap();
    let back = Mesh::open_obj(&obj).unwrap();
    assert_eq!(back.faces(), mesh.faces());
    assert_eq!(back.vertices().len(), mesh.vertices().len());

    save_overlay_grid(
        prepared.image.index_axis(Axis(0), 3),
        prediction.region_mask(Region::WholeTumor),
        work.path().join("vis").join("case.png"),
        4,
    )
    .unwrap();
    assert!(work.path().join("vis").join("case.png").is_file());
}

/// 只看各模态之和的 WT 检测器. 不做裁剪, 因此合成肿瘤不会触及边界.
fn tumor_detector() -> Predictor<PointwiseModel> {
    let mut model = PointwiseModel::new(4, 3, AdamW::new(1e-4, 0.0));
    let mut state = model.state();
    state.weight.row_mut(Region::WholeTumor.channel()).fill(1.0);
    state.bias.fill(-2.0);
    model.load_state(state).unwrap();
    Predictor::new(model, PipelineConfig::default().with_patch_size((12, 12, 12)))
}

fn uploads_from(dir: &Path, id: &str) -> HashMap<String, Vec<u8>> {
    MODALITIES
        .iter()
        .map(|m| {
            let bytes = fs::read(dir.join(format!("{id}_{m}.nii.gz"))).unwrap();
            (m.to_string(), bytes)
        })
        .collect()
}

#[test]
fn test_upload_with_compressed_files() {
    init_logger();
    let raw = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let dir = write_case(raw.path(), "up", (12, 12, 12), [1.0, 1.0, 1.0], false);

    let predictor = tumor_detector();
    let uploads = uploads_from(&dir, "up");
    let resp = predict_upload(&uploads, &predictor, results.path()).unwrap();

    assert_eq!(resp.mask_path, results.path().join(MASK_FILE));
    assert_eq!(resp.mesh_path, results.path().join(MESH_FILE));
    assert_eq!(resp.dice_estimate, None);

    let mask: Array4<f32> = ndarray_npy::read_npy(&resp.mask_path).unwrap();
    assert_eq!(mask.dim(), (3, 12, 12, 12));
    assert!(mask.index_axis(Axis(0), 0).sum() > 0.0);
    let mesh = Mesh::open_obj(&resp.mesh_path).unwrap();
    assert!(!mesh.is_empty());
    assert!(mesh.signed_volume() > 0.0);
}

#[test]
fn test_upload_with_plain_files() {
    let raw = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let dir = raw.path().join("plain");
    fs::create_dir_all(&dir).unwrap();
    let label = synthetic_label((12, 12, 12), 4.0);
    let mut uploads = HashMap::new();
    for (c, m) in MODALITIES.iter().enumerate() {
        let path = dir.join(format!("plain_{m}.nii"));
        Volume::new(synthetic_modality(&label, c), [1.0, 1.0, 1.0])
            .save(&path)
            .unwrap();
        uploads.insert(m.to_string(), fs::read(&path).unwrap());
    }

    let resp = predict_upload(&uploads, &tumor_detector(), results.path().join("nested")).unwrap();
    assert!(resp.mask_path.is_file());
    assert!(resp.mesh_path.is_file());

    uploads.remove("t2");
    assert!(matches!(
        predict_upload(&uploads, &tumor_detector(), results.path()),
        Err(ServiceError::BadRequest(_))
    ));
}
