//! One point of the parameter sweep and everything measured for it.

use log::{debug, info, warn};
use shared::image_proc::FilterError;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::classify::{classify, write_detection_table, ClassifiedCandidate, MatchingRule};
use crate::contrast::{
    algorithm_throughput, calibrate_contrast, mask_circle, measure_contrast, write_contrast_table,
    ContrastCurve, ContrastSettings,
};
use crate::cube::io::read_reduced_cube;
use crate::cube::{CubeIoError, ReducedCube};
use crate::detection::{detect_candidates, DetectionSettings};
use crate::injection::InjectionPlan;
use crate::instrument::{InstrumentConfig, InstrumentError};
use crate::layout::{CubeVariant, OutputLayout};
use crate::params::{format_number, ParameterSet};
use crate::plot::write_contrast_plot;
use crate::reduction::{ReductionJob, ReductionMode};
use crate::report::{Phase, SweepReport};

#[derive(Error, Debug)]
pub enum TrialError {
    #[error("Reduced cube {0} does not exist")]
    MissingCube(PathBuf),

    #[error(transparent)]
    CubeIo(#[from] CubeIoError),

    #[error("Wavelength index {index} is out of range for a cube with {channels} channels")]
    WavelengthIndexOutOfRange { index: usize, channels: usize },

    #[error("Failed to write table: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// State shared by every trial of a sweep.
#[derive(Debug, Clone)]
pub struct SweepContext {
    pub object_name: String,
    /// Known feature blanked before measuring contrast, `[x, y]`
    pub mask_xy: Option<[f64; 2]>,
    pub injections: InjectionPlan,
    pub numbasis: Vec<usize>,
    pub mode: ReductionMode,
    pub layout: OutputLayout,
    pub instrument: InstrumentConfig,
    pub contrast: ContrastSettings,
    pub detection: DetectionSettings,
}

/// A single parameter combination, its output paths and its results.
#[derive(Debug, Clone)]
pub struct Trial {
    params: ParameterSet,
    identifier: String,
    context: Arc<SweepContext>,
    highpass_sigma_px: Option<f64>,
    uncalibrated: BTreeMap<usize, ContrastCurve>,
    calibrated: BTreeMap<usize, ContrastCurve>,
    detections: BTreeMap<usize, Vec<ClassifiedCandidate>>,
}

impl PartialEq for Trial {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params
            && self.context.object_name == other.context.object_name
            && self.context.numbasis == other.context.numbasis
            && self.context.layout == other.context.layout
    }
}

impl Trial {
    /// Create a trial and make sure its output directories exist.
    ///
    /// `frame_edge` is the edge length of the input frames, used to turn a
    /// Fourier highpass cutoff into a smoothing width in pixels.
    pub fn new(
        params: ParameterSet,
        context: Arc<SweepContext>,
        frame_edge: usize,
    ) -> io::Result<Self> {
        context.layout.ensure()?;
        Ok(Self {
            identifier: params.identifier(),
            highpass_sigma_px: params.highpass.pixel_sigma(frame_edge),
            params,
            context,
            uncalibrated: BTreeMap::new(),
            calibrated: BTreeMap::new(),
            detections: BTreeMap::new(),
        })
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn numbasis(&self) -> &[usize] {
        &self.context.numbasis
    }

    pub fn highpass_sigma_px(&self) -> Option<f64> {
        self.highpass_sigma_px
    }

    pub fn reduced_cube_path(&self, variant: CubeVariant, numbasis: usize) -> PathBuf {
        self.context
            .layout
            .reduced_cube_path(variant, &self.identifier, numbasis)
    }

    pub fn contrast_table_path(&self, calibrated: bool, numbasis: usize) -> PathBuf {
        self.context
            .layout
            .contrast_table_path(calibrated, &self.identifier, numbasis)
    }

    pub fn detection_table_path(&self, numbasis: usize) -> PathBuf {
        self.context.layout.detection_table_path(
            &self.identifier,
            numbasis,
            self.context.detection.snr_threshold,
        )
    }

    /// Describe the reduction of one cube variant for this trial.
    pub fn reduction_job<'a>(&'a self, output_dir: &'a Path, variant: CubeVariant) -> ReductionJob<'a> {
        ReductionJob {
            output_dir,
            file_prefix: self.context.layout.reduced_prefix(variant, &self.identifier),
            params: &self.params,
            numbasis: &self.context.numbasis,
            highpass_sigma_px: self.highpass_sigma_px,
            mode: self.context.mode,
            format: self.context.layout.format(),
        }
    }

    pub fn uncalibrated_contrast(&self, numbasis: usize) -> Option<&ContrastCurve> {
        self.uncalibrated.get(&numbasis)
    }

    pub fn calibrated_contrast(&self, numbasis: usize) -> Option<&ContrastCurve> {
        self.calibrated.get(&numbasis)
    }

    pub fn detections(&self, numbasis: usize) -> Option<&[ClassifiedCandidate]> {
        self.detections.get(&numbasis).map(Vec::as_slice)
    }

    /// Measure contrast for every basis count.
    ///
    /// With `uses_fakes` the with-fakes cubes are measured and calibrated by
    /// the recovered throughput of the injected sources; otherwise the
    /// without-fakes cubes are measured as they are. A basis count whose cube
    /// cannot be measured is recorded in `report` and skipped. Returns the
    /// number of failures.
    pub fn measure_contrast(&mut self, uses_fakes: bool, report: &mut SweepReport) -> usize {
        let variant = if uses_fakes {
            CubeVariant::WithFakes
        } else {
            CubeVariant::WithoutFakes
        };
        let mut failed = 0;
        for numbasis in self.context.numbasis.clone() {
            if let Err(e) = self.measure_contrast_at(uses_fakes, numbasis, report) {
                let cube_path = self.reduced_cube_path(variant, numbasis);
                report.record_failure(&self.identifier, Phase::Contrast, Some(&cube_path), e.to_string());
                failed += 1;
            }
        }
        failed
    }

    /// Measure, persist and store the contrast curve of one reduced cube.
    pub fn measure_contrast_at(
        &mut self,
        uses_fakes: bool,
        numbasis: usize,
        report: &mut SweepReport,
    ) -> Result<ContrastCurve, TrialError> {
        let ctx = Arc::clone(&self.context);
        let variant = if uses_fakes {
            CubeVariant::WithFakes
        } else {
            CubeVariant::WithoutFakes
        };
        let cube = self.open_reduced(variant, numbasis)?;
        let geometry = ctx.instrument.aperture_geometry(&cube.header.filter_name)?;
        let calibration = ctx
            .instrument
            .spectral_calibration(&cube.header, cube.n_channels());

        let index = ctx.contrast.wavelength_index;
        let channel = cube
            .channel(index)
            .ok_or(TrialError::WavelengthIndexOutOfRange {
                index,
                channels: cube.n_channels(),
            })?;
        let ratio = calibration.flux_ratio[index];
        let mut frame = channel.mapv(|v| v * ratio);
        if let Some(xy) = ctx.mask_xy {
            mask_circle(&mut frame, xy, 2.0 * geometry.fwhm_px);
        }

        let center = cube.center();
        let raw = measure_contrast(&frame.view(), &geometry, center, &ctx.contrast)?;
        let table_path = self.contrast_table_path(uses_fakes, numbasis);

        let curve = if uses_fakes {
            let throughput = algorithm_throughput(
                &frame.view(),
                center,
                &ctx.injections,
                ctx.contrast.search_radius_px,
            );
            if throughput.is_degenerate() {
                report.record_degenerate(
                    &self.identifier,
                    Phase::Contrast,
                    &table_path,
                    format!("unusable throughput {:?}", throughput.throughput),
                );
            }
            calibrate_contrast(&raw, &throughput)
        } else {
            raw
        };

        let (column, label) = if uses_fakes {
            ("Calibrated Contrast", "Calibrated")
        } else {
            ("Uncalibrated Contrast", "Uncalibrated")
        };
        let dropped = write_contrast_table(&table_path, &curve, column)?;
        if curve.is_degenerate() {
            report.record_degenerate(
                &self.identifier,
                Phase::Contrast,
                &table_path,
                "no finite contrast values",
            );
        } else if dropped > 0 {
            report.record_degenerate(
                &self.identifier,
                Phase::Contrast,
                &table_path,
                format!("{dropped} of {} contrast values were not finite", curve.len()),
            );
        }
        debug!("Wrote {}", table_path.display());

        let wavelength = calibration.wavelengths_um[index];
        let title = format!(
            "{label} Contrast at {wavelength:.2}um ({})",
            ctx.object_name
        );
        let plot_path = ctx
            .layout
            .contrast_plot_path(uses_fakes, &self.identifier, numbasis);
        if let Err(e) = write_contrast_plot(&plot_path, &curve, &title, column) {
            warn!("Could not render {}: {e}", plot_path.display());
        }

        let store = if uses_fakes {
            &mut self.calibrated
        } else {
            &mut self.uncalibrated
        };
        store.insert(numbasis, curve.clone());
        Ok(curve)
    }

    /// Detect and classify candidates in every with-fakes cube.
    ///
    /// Failures are recorded in `report` per basis count. Returns the number
    /// of failures.
    pub fn detect_candidates(&mut self, report: &mut SweepReport) -> usize {
        let mut failed = 0;
        for numbasis in self.context.numbasis.clone() {
            if let Err(e) = self.detect_candidates_at(numbasis, report) {
                let cube_path = self.reduced_cube_path(CubeVariant::WithFakes, numbasis);
                report.record_failure(&self.identifier, Phase::Detection, Some(&cube_path), e.to_string());
                failed += 1;
            }
        }
        failed
    }

    /// Detect, classify and persist the candidates of one reduced cube.
    pub fn detect_candidates_at(
        &mut self,
        numbasis: usize,
        report: &mut SweepReport,
    ) -> Result<Vec<ClassifiedCandidate>, TrialError> {
        let ctx = Arc::clone(&self.context);
        let cube = self.open_reduced(CubeVariant::WithFakes, numbasis)?;
        let geometry = ctx.instrument.aperture_geometry(&cube.header.filter_name)?;

        let (candidates, snr) = detect_candidates(
            &cube.data.view(),
            cube.center(),
            geometry.fwhm_px,
            geometry.inner_working_angle_px,
            &ctx.detection,
        );
        let table_path = self.detection_table_path(numbasis);
        if snr.iter().all(|v| !v.is_finite()) {
            report.record_degenerate(
                &self.identifier,
                Phase::Detection,
                &table_path,
                "signal-to-noise map has no finite values",
            );
        }

        let rule = MatchingRule::for_fwhm(ctx.injections.fwhm_px());
        let rows = classify(candidates, &ctx.injections, &rule);
        write_detection_table(&table_path, &rows)?;

        let injected = rows.iter().filter(|r| r.injected).count();
        info!(
            "{} KL{numbasis}: {} candidates above SNR {} ({injected} injected)",
            self.identifier,
            rows.len(),
            format_number(ctx.detection.snr_threshold)
        );

        self.detections.insert(numbasis, rows.clone());
        Ok(rows)
    }

    fn open_reduced(&self, variant: CubeVariant, numbasis: usize) -> Result<ReducedCube, TrialError> {
        let path = self.reduced_cube_path(variant, numbasis);
        if !path.exists() {
            return Err(TrialError::MissingCube(path));
        }
        Ok(read_reduced_cube(&path)?)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::cube::{CubeFormat, CubeHeader};
    use ndarray::Axis;
    use shared::image_proc::gaussian::{add_gaussian, fwhm_to_sigma};
    use shared::image_proc::noise::simple_normal_array;

    pub const EDGE: usize = 101;
    pub const STAR: f64 = 50.0;
    /// Spot ratio of the broadband filter at 1.55 um
    pub const RATIO: f64 = 2.72e-3;

    pub fn context(output_root: &Path) -> SweepContext {
        SweepContext {
            object_name: "TestStar".to_string(),
            mask_xy: None,
            injections: InjectionPlan::new(vec![1e-4], vec![20.0], vec![90.0], 6.0).unwrap(),
            numbasis: vec![1, 5],
            mode: ReductionMode::Adi,
            layout: OutputLayout::new(output_root, "TestStar", CubeFormat::Json),
            instrument: InstrumentConfig::charis(),
            contrast: ContrastSettings {
                wavelength_index: 0,
                ..ContrastSettings::default()
            },
            detection: DetectionSettings::default(),
        }
    }

    /// A north-up single-channel cube with noise and, optionally, the
    /// injected source of [`context`] in contrast units divided back to raw.
    pub fn reduced_cube(with_source: bool, seed: u64) -> ReducedCube {
        let noise = simple_normal_array((EDGE, EDGE), 0.0, 0.002, seed).unwrap();
        let mut data = noise.insert_axis(Axis(0));
        if with_source {
            let mut frame = data.index_axis_mut(Axis(0), 0);
            add_gaussian(&mut frame, STAR - 20.0, STAR, 1e-4 / RATIO, fwhm_to_sigma(6.0));
        }
        ReducedCube {
            header: CubeHeader {
                filter_name: "broadband".to_string(),
                lam_min_nm: 1550.0,
                dloglam: 0.0,
                psf_center: [STAR, STAR],
            },
            data,
        }
    }
}
