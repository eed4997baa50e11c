//! End-to-end runs over synthetic volumes

use std::f64::consts::PI;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use neuroscope::features::feature_name;
use neuroscope::nifti_io;
use neuroscope::spatial::TemplateGrid;
use neuroscope::volume::scaled_affine;
use neuroscope::{
    Atlas, ConfoundTable, EntropyMetric, FeatureVector, OutputOptions, Pipeline, PipelineConfig, Volume,
};

const DIMS: (usize, usize, usize) = (6, 6, 6);
const NT: usize = 80;
const TR: f64 = 2.0;

fn synthetic_volume(seed: u64) -> Volume {
    let mut rng = StdRng::seed_from_u64(seed);
    let (nx, ny, nz) = DIMS;
    let nxyz = nx * ny * nz;
    let mut data = vec![0.0; nxyz * NT];
    for v in 0..nxyz {
        let phase = rng.gen::<f64>() * 2.0 * PI;
        for t in 0..NT {
            let time = t as f64 * TR;
            data[v + t * nxyz] = 100.0
                + 3.0 * (2.0 * PI * 0.04 * time + phase).sin()
                + rng.gen::<f64>() - 0.5;
        }
    }
    Volume::new(data, (nx, ny, nz, NT), (3.0, 3.0, 3.0),
                scaled_affine((3.0, 3.0, 3.0), (0.0, 0.0, 0.0)), TR).unwrap()
}

fn synthetic_confounds(seed: u64) -> ConfoundTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fd: Vec<Option<f64>> = (0..NT).map(|_| Some(0.05 * rng.gen::<f64>())).collect();
    fd[0] = None;
    fd[40] = Some(0.9);
    let x: Vec<Option<f64>> = (0..NT).map(|_| Some(rng.gen::<f64>() - 0.5)).collect();
    let rot_z: Vec<Option<f64>> = (0..NT).map(|t| Some(0.01 * t as f64)).collect();
    let comp: Vec<Option<f64>> = (0..NT).map(|_| Some(rng.gen::<f64>())).collect();
    ConfoundTable::from_columns(vec![
        ("FramewiseDisplacement".to_string(), fd),
        ("X".to_string(), x),
        ("RotZ".to_string(), rot_z),
        ("a_comp_cor_00".to_string(), comp),
    ]).unwrap()
}

fn confounds_tsv(table: &ConfoundTable) -> String {
    let names = table.names();
    let mut text = names.join("\t");
    text.push('\n');
    for row in 0..table.n_rows() {
        let cells: Vec<String> = names.iter()
            .map(|n| match table.column(n).unwrap()[row] {
                Some(v) => v.to_string(),
                None => "n/a".to_string(),
            })
            .collect();
        text.push_str(&cells.join("\t"));
        text.push('\n');
    }
    text
}

fn test_pipeline(volume: &Volume) -> Pipeline {
    let atlas = Atlas::from_coords(&[[6.0, 6.0, 6.0], [9.0, 9.0, 9.0]]).unwrap();
    Pipeline::new(PipelineConfig::default(), Arc::new(atlas))
        .unwrap()
        .with_grid(TemplateGrid::of_volume(volume))
}

#[test]
fn test_end_to_end_feature_layout() {
    let volume = synthetic_volume(7);
    let output = test_pipeline(&volume).run(&volume, &synthetic_confounds(11)).unwrap();

    assert_eq!(output.processed.dims(), volume.dims());
    assert_eq!(output.features.len(), 8);

    let expected: Vec<String> = EntropyMetric::ALL.iter()
        .flat_map(|&m| (0..2).map(move |r| feature_name(r, m)))
        .collect();
    assert_eq!(output.features.names(), expected.as_slice());
    assert_eq!(output.features.names()[0], "ROI_1_SaEn");
    assert!(output.features.values().iter().all(|v| !v.is_nan()));

    // Differential entropy is finite for any non-constant signal
    for r in 0..2 {
        let de = output.features.get(&feature_name(r, EntropyMetric::Differential)).unwrap();
        assert!(de.is_finite());
    }
}

#[test]
fn test_constant_volume_gives_finite_features() {
    let nt = 50;
    let volume = Volume::new(vec![1.0; 64 * nt], (4, 4, 4, nt), (3.0, 3.0, 3.0),
                             scaled_affine((3.0, 3.0, 3.0), (0.0, 0.0, 0.0)), TR).unwrap();
    let confounds = ConfoundTable::from_columns(vec![
        ("FramewiseDisplacement".to_string(), vec![Some(0.01); nt]),
        ("WhiteMatter".to_string(), vec![Some(5.0); nt]),
        ("GlobalSignal".to_string(), vec![Some(1.0); nt]),
    ]).unwrap();

    let atlas = Atlas::from_coords(&[[4.5, 4.5, 4.5], [0.0, 0.0, 0.0]]).unwrap();
    let pipeline = Pipeline::new(PipelineConfig::default(), Arc::new(atlas))
        .unwrap()
        .with_grid(TemplateGrid::of_volume(&volume));

    let output = pipeline.run(&volume, &confounds).unwrap();
    assert_eq!(output.features.len(), 4 * 2);
    assert!(output.features.values().iter().all(|v| v.is_finite()));
    assert!(output.features.values().iter().all(|&v| v == 0.0));
}

#[test]
fn test_processed_volume_is_band_limited() {
    let volume = synthetic_volume(3);
    let output = test_pipeline(&volume).run(&volume, &synthetic_confounds(5)).unwrap();

    // The 100-unit baseline is outside the pass band
    let center = output.processed.voxel_series(2 + 2 * 6 + 2 * 36);
    let mean = center.iter().sum::<f64>() / center.len() as f64;
    assert!(mean.abs() < 1.0, "mean {}", mean);
}

#[test]
fn test_runs_are_deterministic() {
    let volume = synthetic_volume(21);
    let confounds = synthetic_confounds(22);
    let pipeline = test_pipeline(&volume);
    let a = pipeline.run(&volume, &confounds).unwrap().features;
    let b = pipeline.run(&volume, &confounds).unwrap().features;
    assert_eq!(a.names(), b.names());
    for (x, y) in a.values().iter().zip(b.values()) {
        assert!(x == y || (x.is_infinite() && y.is_infinite()));
    }
}

#[test]
fn test_run_files_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let volume = synthetic_volume(9);
    let confounds = synthetic_confounds(10);

    let bold_path = dir.path().join("sub-01_task-rest_space-MNI_desc-preproc_bold.nii.gz");
    nifti_io::write_volume_file(&bold_path, &volume).unwrap();
    let confounds_path = dir.path().join("sub-01_task-rest_desc-confounds_timeseries.tsv");
    std::fs::write(&confounds_path, confounds_tsv(&confounds)).unwrap();

    let out_dir = dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();
    let csv_path = out_dir.join("entropy_features.csv");
    let options = OutputOptions {
        features_csv: Some(csv_path.clone()),
        processed_volume: Some(out_dir.clone()),
    };

    let features = test_pipeline(&volume).run_files(&bold_path, &confounds_path, &options).unwrap();
    assert_eq!(features.len(), 8);

    let reread = FeatureVector::read_csv(&csv_path).unwrap();
    assert_eq!(reread.names(), features.names());
    for (x, y) in reread.values().iter().zip(features.values()) {
        assert!((x - y).abs() < 1e-9 || (x.is_infinite() && y.is_infinite()));
    }

    let processed = nifti_io::read_volume_file(&out_dir.join("bold_final_processed.nii.gz")).unwrap();
    assert_eq!(processed.dims(), volume.dims());
}

#[test]
fn test_missing_displacement_column_fails() {
    let volume = synthetic_volume(1);
    let table = ConfoundTable::from_columns(vec![
        ("X".to_string(), vec![Some(0.0); NT]),
    ]).unwrap();
    assert!(test_pipeline(&volume).run(&volume, &table).is_err());
}
