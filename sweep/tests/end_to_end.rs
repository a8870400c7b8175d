//! Full sweep on a synthetic sequence: inject, reduce with a pass-through
//! reducer, measure contrast and classify detections.

use approx::assert_abs_diff_eq;
use ndarray::{Array3, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use sweep::classify::read_detection_table;
use sweep::cube::io::write_reduced_cube;
use sweep::cube::{CubeHeader, DataCube, Exposure, ReducedCube};
use sweep::layout::CubeVariant;
use sweep::params::ArtifactName;
use sweep::reduction::{ReductionError, ReductionJob};
use sweep::report::Phase;
use sweep::{Reducer, SweepConfig, TestDataset};
use tempfile::TempDir;

const EDGE: usize = 101;
const STAR: f64 = 50.0;

/// Averages the frames of each channel without derotating. Exact for a
/// sequence taken at zero parallactic angle.
struct PassThrough;

impl Reducer for PassThrough {
    fn name(&self) -> &str {
        "pass-through"
    }

    fn reduce(&self, cube: &DataCube, job: &ReductionJob<'_>) -> Result<(), ReductionError> {
        let (rows, cols) = cube.frame_shape();
        let mut data = Array3::zeros((cube.n_channels(), rows, cols));
        for channel in 0..cube.n_channels() {
            let frames = cube.frames_for_channel(channel);
            let mut out = data.index_axis_mut(Axis(0), channel);
            for &i in &frames {
                out += &cube.frame(i);
            }
            out /= frames.len() as f64;
        }
        let reduced = ReducedCube {
            header: cube.header().clone(),
            data,
        };
        for &n in job.numbasis {
            write_reduced_cube(&job.output_path(n), &reduced, job.format)?;
        }
        Ok(())
    }
}

/// Fails every reduction of trials with a single annulus.
struct FailsOneAnnulus;

impl Reducer for FailsOneAnnulus {
    fn name(&self) -> &str {
        "fails-one-annulus"
    }

    fn reduce(&self, cube: &DataCube, job: &ReductionJob<'_>) -> Result<(), ReductionError> {
        if job.params.annuli == 1 {
            return Err(ReductionError::Failed("synthetic failure".to_string()));
        }
        PassThrough.reduce(cube, job)
    }
}

fn noisy_sequence(seed: u64) -> DataCube {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 0.002).unwrap();
    let data = Array3::from_shape_simple_fn((1, EDGE, EDGE), || normal.sample(&mut rng));
    let exposure = Exposure {
        header: CubeHeader {
            filter_name: "broadband".to_string(),
            lam_min_nm: 1550.0,
            dloglam: 0.0,
            psf_center: [STAR, STAR],
        },
        parallactic_angle_deg: 0.0,
        data,
    };
    DataCube::from_exposures(vec![exposure]).unwrap()
}

fn sweep_config(output_root: &Path) -> SweepConfig {
    let config = serde_json::json!({
        "fileset": "unused/*.json",
        "object_name": "Synthetic",
        "output_root": output_root,
        "fake_fluxes": [1e-4],
        "fake_seps": [20.0],
        "fake_pas": [90.0],
        "fake_fwhm": 6.0,
        "annuli": [1, 2],
        "subsections": [1],
        "movement": [1.0],
        "highpass": [false],
        "numbasis": [1],
        "mode": "ADI",
        "contrast": { "wavelength_index": 0 }
    });
    serde_json::from_value(config).unwrap()
}

#[test]
fn test_sweep_recovers_injected_companion() {
    let dir = TempDir::new().unwrap();
    let config = sweep_config(dir.path());
    let mut dataset = TestDataset::from_cube(noisy_sequence(7), &config).unwrap();

    let identifiers: BTreeSet<_> = dataset.trials().iter().map(|t| t.identifier().to_string()).collect();
    assert_eq!(dataset.trials().len(), 2);
    assert_eq!(identifiers.len(), 2);

    dataset.inject_fakes().unwrap();
    let reduction = dataset.run_reduction(&PassThrough, true, true);
    assert_eq!(reduction.attempted, 4);
    assert_eq!(reduction.failed, 0);

    let measurement = dataset.measure_and_classify(&[true, false], true);
    assert_eq!(measurement.failed, 0);
    assert!(dataset.report().failures().is_empty());

    for trial in dataset.trials() {
        let rows = trial.detections(1).unwrap();
        let injected: Vec<_> = rows.iter().filter(|r| r.injected).collect();
        assert_eq!(injected.len(), 1, "{}", trial.identifier());
        assert_abs_diff_eq!(injected[0].candidate.x, -20.0, epsilon = 0.05);
        assert_abs_diff_eq!(injected[0].candidate.y, 0.0, epsilon = 0.05);

        assert!(trial.calibrated_contrast(1).is_some());
        assert!(trial.uncalibrated_contrast(1).is_some());

        // Every artifact name reads back to the trial that wrote it.
        for path in [
            trial.reduced_cube_path(CubeVariant::WithFakes, 1),
            trial.contrast_table_path(true, 1),
            trial.detection_table_path(1),
        ] {
            assert!(path.exists(), "{}", path.display());
            let name = ArtifactName::parse(path.file_name().unwrap().to_str().unwrap()).unwrap();
            assert_eq!(&name.params, trial.params());
            assert_eq!(name.numbasis, 1);
        }
    }
}

#[test]
fn test_detection_rerun_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let config = sweep_config(dir.path());
    let mut dataset = TestDataset::from_cube(noisy_sequence(21), &config).unwrap();
    dataset.inject_fakes().unwrap();
    dataset.run_reduction(&PassThrough, true, false);

    dataset.measure_and_classify(&[], true);
    let path = dataset.trials()[0].detection_table_path(1);
    let first = fs::read(&path).unwrap();

    dataset.measure_and_classify(&[], true);
    let second = fs::read(&path).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        read_detection_table(&path).unwrap(),
        dataset.trials()[0].detections(1).unwrap()
    );
}

#[test]
fn test_failed_trial_does_not_stop_the_sweep() {
    let dir = TempDir::new().unwrap();
    let config = sweep_config(dir.path());
    let mut dataset = TestDataset::from_cube(noisy_sequence(3), &config).unwrap();
    dataset.inject_fakes().unwrap();

    let reduction = dataset.run_reduction(&FailsOneAnnulus, true, true);
    assert_eq!(reduction.attempted, 4);
    assert_eq!(reduction.failed, 2);

    let measurement = dataset.measure_and_classify(&[true, false], true);
    // Three measurements per trial; all of the failed trial's are lost.
    assert_eq!(measurement.attempted, 6);
    assert_eq!(measurement.failed, 3);

    let (failed, survived) = (&dataset.trials()[0], &dataset.trials()[1]);
    assert_eq!(failed.params().annuli, 1);
    assert!(dataset.report().has_failure(failed.identifier(), Phase::Reduction));
    assert!(dataset.report().has_failure(failed.identifier(), Phase::Detection));
    assert!(!dataset.report().has_failure(survived.identifier(), Phase::Reduction));
    assert!(failed.detections(1).is_none());
    assert!(survived.detections(1).is_some());

    let failures = fs::read_to_string(dataset.context().layout.failures_path()).unwrap();
    assert!(failures.contains("synthetic failure"));
}
