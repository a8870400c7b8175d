//! The sweep controller: one dataset, every trial, three phases.
//!
//! A [`TestDataset`] owns the input sequence and a copy of it that receives
//! the synthetic sources. It expands the configured axes into trials and then
//! drives, in order, injection, reduction and measurement. Trials run one at a
//! time. A failing trial is recorded in the sweep report and the sweep moves
//! on to the next one.

use log::{info, warn};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, SweepConfig};
use crate::cube::io::read_exposure;
use crate::cube::DataCube;
use crate::injection::{inject_sources, InjectionError};
use crate::instrument::SpectralCalibration;
use crate::layout::{CubeVariant, OutputLayout};
use crate::manifest::{ManifestError, SweepManifest};
use crate::reduction::Reducer;
use crate::report::{Phase, SweepReport};
use crate::trial::{SweepContext, Trial};

/// Progress is logged every this many completed units.
const PROGRESS_INTERVAL: usize = 5;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot prepare output directory {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Injection(#[from] InjectionError),
}

/// Outcome counts of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSummary {
    pub attempted: usize,
    pub failed: usize,
}

impl PhaseSummary {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed
    }
}

pub struct TestDataset {
    raw: DataCube,
    with_fakes: DataCube,
    calibration: SpectralCalibration,
    context: Arc<SweepContext>,
    trials: Vec<Trial>,
    report: SweepReport,
    injections_applied: usize,
}

impl TestDataset {
    /// Load the input files named by the configuration and set up the sweep.
    pub fn new(config: &SweepConfig) -> Result<Self, DatasetError> {
        config.validate()?;
        let files = config.input_files()?;
        info!("Loading {} input files matching {}", files.len(), config.fileset);

        let exposures = files
            .iter()
            .map(|path| read_exposure(path))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::from)?;
        let cube = DataCube::from_exposures(exposures).map_err(ConfigError::from)?;
        Self::from_cube(cube, config)
    }

    /// Set up the sweep over an already assembled input sequence.
    pub fn from_cube(cube: DataCube, config: &SweepConfig) -> Result<Self, DatasetError> {
        config.validate()?;
        let geometry = config
            .instrument
            .aperture_geometry(&cube.header().filter_name)
            .map_err(ConfigError::from)?;
        let calibration = config
            .instrument
            .spectral_calibration(cube.header(), cube.n_channels());
        if config.contrast.wavelength_index >= cube.n_channels() {
            warn!(
                "Contrast wavelength index {} is outside the {} channels of the input; contrast measurement will fail",
                config.contrast.wavelength_index,
                cube.n_channels()
            );
        }

        let layout = OutputLayout::new(&config.output_root, &config.object_name, config.cube_format);
        layout.ensure().map_err(|source| DatasetError::Output {
            path: layout.object_dir().to_path_buf(),
            source,
        })?;

        let context = Arc::new(SweepContext {
            object_name: config.object_name.clone(),
            mask_xy: config.mask_xy,
            injections: config.injection_plan()?,
            numbasis: config.numbasis.clone(),
            mode: config.mode,
            layout,
            instrument: config.instrument.clone(),
            contrast: config.contrast,
            detection: config.detection,
        });

        let axes = config.axes();
        let trials = axes
            .expand()
            .into_iter()
            .map(|params| Trial::new(params, Arc::clone(&context), cube.edge_length()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|source| DatasetError::Output {
                path: context.layout.object_dir().to_path_buf(),
                source,
            })?;

        let manifest = SweepManifest::new(
            &context.object_name,
            axes,
            &context.numbasis,
            &context.injections,
            context.mode,
            config.cube_format,
            context.detection.snr_threshold,
            trials.iter().map(|t| t.identifier().to_string()).collect(),
        );
        manifest.write(&context.layout.manifest_path())?;

        let variants = usize::from(config.phases.run_on_fakes) + usize::from(config.phases.run_on_nofakes);
        info!(
            "{}: {} trials x {} basis counts x {} variants = {} reduced cubes of {} x {} x {} under {}",
            context.object_name,
            trials.len(),
            context.numbasis.len(),
            variants,
            trials.len() * context.numbasis.len() * variants,
            cube.n_channels(),
            cube.frame_shape().0,
            cube.frame_shape().1,
            context.layout.object_dir().display()
        );
        info!(
            "FWHM {:.3} px, IWA {:.1} px, OWA {:.3} px",
            geometry.fwhm_px, geometry.inner_working_angle_px, geometry.outer_working_angle_px
        );

        Ok(Self {
            with_fakes: cube.clone(),
            raw: cube,
            calibration,
            context,
            trials,
            report: SweepReport::new(),
            injections_applied: 0,
        })
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn report(&self) -> &SweepReport {
        &self.report
    }

    pub fn context(&self) -> &SweepContext {
        &self.context
    }

    pub fn raw_cube(&self) -> &DataCube {
        &self.raw
    }

    pub fn cube_with_fakes(&self) -> &DataCube {
        &self.with_fakes
    }

    pub fn calibration(&self) -> &SpectralCalibration {
        &self.calibration
    }

    /// Add the configured synthetic sources to the with-fakes cube.
    ///
    /// Each call injects the full population again. A failure is logged
    /// against every trial, since none of them gets a with-fakes cube.
    pub fn inject_fakes(&mut self) -> Result<(), DatasetError> {
        if self.injections_applied > 0 {
            warn!(
                "Synthetic sources were already injected {} time(s); injecting again doubles them",
                self.injections_applied
            );
        }
        if let Err(e) = inject_sources(&mut self.with_fakes, &self.context.injections, &self.calibration) {
            warn!("Injection failed: {e}");
            for trial in &self.trials {
                self.report
                    .record_failure(trial.identifier(), Phase::Injection, None, e.to_string());
            }
            self.persist_report();
            return Err(e.into());
        }
        self.injections_applied += 1;
        info!(
            "Injected {} synthetic sources into {} frames",
            self.context.injections.len(),
            self.with_fakes.n_frames()
        );
        Ok(())
    }

    /// Run the reducer for every trial on the requested cube variants.
    pub fn run_reduction(
        &mut self,
        reducer: &dyn Reducer,
        run_on_fakes: bool,
        run_on_nofakes: bool,
    ) -> PhaseSummary {
        let mut variants = Vec::new();
        if run_on_fakes {
            variants.push(CubeVariant::WithFakes);
        }
        if run_on_nofakes {
            variants.push(CubeVariant::WithoutFakes);
        }
        if variants.is_empty() {
            warn!("Reduction requested on neither cube variant; nothing to do");
            return PhaseSummary::default();
        }

        let total = self.trials.len() * variants.len();
        let mut summary = PhaseSummary {
            attempted: total,
            failed: 0,
        };
        let mut done = 0;
        info!("Starting {total} {} reduction runs", reducer.name());

        for trial in &self.trials {
            for &variant in &variants {
                let cube = match variant {
                    CubeVariant::WithFakes => &self.with_fakes,
                    CubeVariant::WithoutFakes => &self.raw,
                };
                let output_dir = self.context.layout.reduced_dir(variant);
                let job = trial.reduction_job(&output_dir, variant);
                if let Err(e) = reducer.reduce(cube, &job) {
                    self.report.record_failure(
                        trial.identifier(),
                        Phase::Reduction,
                        Some(&output_dir),
                        format!("{} on {} cube: {e}", reducer.name(), variant.tag()),
                    );
                    summary.failed += 1;
                }

                done += 1;
                if done % PROGRESS_INTERVAL == 0 || done == total {
                    info!(
                        "{done}/{total} reduction runs complete ({:.1}%)",
                        100.0 * done as f64 / total as f64
                    );
                }
            }
        }

        self.persist_report();
        summary
    }

    /// Measure contrast in each requested mode and, optionally, detect and
    /// classify candidates, for every trial.
    ///
    /// `calibrate` lists the contrast modes: `true` measures the with-fakes
    /// cubes calibrated by throughput, `false` the without-fakes cubes.
    pub fn measure_and_classify(&mut self, calibrate: &[bool], detect_planets: bool) -> PhaseSummary {
        if calibrate.is_empty() && !detect_planets {
            warn!("Neither contrast measurement nor detection requested; nothing to do");
            return PhaseSummary::default();
        }

        let per_trial = self.context.numbasis.len() * (calibrate.len() + usize::from(detect_planets));
        let total = self.trials.len();
        let mut summary = PhaseSummary::default();

        for (i, trial) in self.trials.iter_mut().enumerate() {
            for &uses_fakes in calibrate {
                summary.failed += trial.measure_contrast(uses_fakes, &mut self.report);
            }
            if detect_planets {
                summary.failed += trial.detect_candidates(&mut self.report);
            }
            summary.attempted += per_trial;

            let done = i + 1;
            if done % PROGRESS_INTERVAL == 0 || done == total {
                info!(
                    "{done}/{total} trials measured ({:.1}%)",
                    100.0 * done as f64 / total as f64
                );
            }
        }

        self.persist_report();
        summary
    }

    /// Persist the failure and degenerate-result logs. Logged, never fatal.
    fn persist_report(&self) {
        if let Err(e) = self.report.write(&self.context.layout) {
            warn!(
                "Could not write sweep report under {}: {e}",
                self.context.layout.object_dir().display()
            );
        }
    }
}
