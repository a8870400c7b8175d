//! Sweep configuration loaded from JSON.
//!
//! ```json
//! {
//!   "fileset": "data/HD1160/*.json",
//!   "object_name": "HD1160",
//!   "mask_xy": [144.0, 80.0],
//!   "fake_fluxes": [5e-4, 5e-5],
//!   "fake_seps": [20.0, 40.0],
//!   "fake_pas": [0.0, 90.0, 180.0, 270.0],
//!   "fake_fwhm": 3.5,
//!   "annuli": [4, 6],
//!   "subsections": [2, 4],
//!   "movement": [1.0, 2.0],
//!   "highpass": [true, 12.0],
//!   "numbasis": [1, 10, 20]
//! }
//! ```

use glob::glob;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::contrast::ContrastSettings;
use crate::cube::{CubeFormat, CubeIoError};
use crate::detection::DetectionSettings;
use crate::injection::{InjectionError, InjectionPlan};
use crate::instrument::{InstrumentConfig, InstrumentError};
use crate::params::{
    format_number, validate_template_name, Highpass, IdentifierError, ParameterSet, NO_TEMPLATE,
};
use crate::reduction::ReductionMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No input files match '{0}'")]
    NoInputFiles(String),

    #[error("Invalid input pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Sweep axis '{0}' has no values")]
    EmptyAxis(&'static str),

    #[error("Sweep axis '{axis}' lists '{value}' more than once")]
    DuplicateAxisValue { axis: &'static str, value: String },

    #[error("Invalid injection population: {0}")]
    Injection(#[from] InjectionError),

    #[error(transparent)]
    InvalidTemplateName(#[from] IdentifierError),

    #[error("Basis counts must be positive, got {0:?}")]
    InvalidNumbasis(Vec<usize>),

    #[error("Highpass cutoff must be finite and positive, got {0}")]
    InvalidHighpassCutoff(f64),

    #[error("Object name '{0}' cannot be used as a directory name")]
    InvalidObjectName(String),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error(transparent)]
    CubeIo(#[from] CubeIoError),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Which phases of the sweep to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSwitches {
    pub run_on_fakes: bool,
    pub run_on_nofakes: bool,
    /// Contrast modes to measure: `true` calibrated, `false` uncalibrated
    pub calibrate: Vec<bool>,
    pub detect_planets: bool,
}

impl Default for PhaseSwitches {
    fn default() -> Self {
        Self {
            run_on_fakes: true,
            run_on_nofakes: true,
            calibrate: vec![true, false],
            detect_planets: true,
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_spectrum() -> Vec<Option<String>> {
    vec![None]
}

fn default_corr_smooth() -> Vec<f64> {
    vec![1.0]
}

fn default_highpass() -> Vec<Highpass> {
    vec![Highpass::Enabled(true)]
}

/// Complete description of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Glob pattern of the input exposures
    pub fileset: String,
    pub object_name: String,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Known feature masked out of contrast estimates, as `[x, y]` pixels
    #[serde(default)]
    pub mask_xy: Option<[f64; 2]>,

    /// Injected contrasts, paired element-wise with `fake_seps`
    pub fake_fluxes: Vec<f64>,
    pub fake_seps: Vec<f64>,
    pub fake_pas: Vec<f64>,
    pub fake_fwhm: f64,

    pub annuli: Vec<u32>,
    pub subsections: Vec<u32>,
    pub movement: Vec<f64>,
    #[serde(default = "default_spectrum")]
    pub spectrum: Vec<Option<String>>,
    #[serde(default = "default_corr_smooth")]
    pub corr_smooth: Vec<f64>,
    #[serde(default = "default_highpass")]
    pub highpass: Vec<Highpass>,
    pub numbasis: Vec<usize>,

    #[serde(default)]
    pub mode: ReductionMode,
    #[serde(default)]
    pub cube_format: CubeFormat,
    #[serde(default)]
    pub instrument: InstrumentConfig,
    #[serde(default)]
    pub contrast: ContrastSettings,
    #[serde(default)]
    pub detection: DetectionSettings,
    #[serde(default)]
    pub phases: PhaseSwitches,
}

/// The swept axes; their cross product is the list of trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAxes {
    pub annuli: Vec<u32>,
    pub subsections: Vec<u32>,
    pub movement: Vec<f64>,
    pub spectrum: Vec<Option<String>>,
    pub corr_smooth: Vec<f64>,
    pub highpass: Vec<Highpass>,
}

impl SweepAxes {
    /// Number of parameter sets in the cross product
    pub fn trial_count(&self) -> usize {
        self.annuli.len()
            * self.subsections.len()
            * self.movement.len()
            * self.spectrum.len()
            * self.corr_smooth.len()
            * self.highpass.len()
    }

    /// Every parameter set, with the annuli axis varying slowest.
    pub fn expand(&self) -> Vec<ParameterSet> {
        let mut sets = Vec::with_capacity(self.trial_count());
        for &annuli in &self.annuli {
            for &subsections in &self.subsections {
                for &movement in &self.movement {
                    for spectrum in &self.spectrum {
                        for &corr_smooth in &self.corr_smooth {
                            for &highpass in &self.highpass {
                                sets.push(ParameterSet {
                                    annuli,
                                    subsections,
                                    movement,
                                    spectrum: spectrum.clone(),
                                    corr_smooth,
                                    highpass,
                                });
                            }
                        }
                    }
                }
            }
        }
        sets
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_axis("annuli", self.annuli.iter().map(u32::to_string))?;
        check_axis("subsections", self.subsections.iter().map(u32::to_string))?;
        check_axis("movement", self.movement.iter().map(|&v| format_number(v)))?;
        check_axis(
            "spectrum",
            self.spectrum
                .iter()
                .map(|s| s.clone().unwrap_or_else(|| NO_TEMPLATE.to_string())),
        )?;
        check_axis("corr_smooth", self.corr_smooth.iter().map(|&v| format_number(v)))?;
        check_axis("highpass", self.highpass.iter().map(Highpass::to_string))?;

        for highpass in &self.highpass {
            if let Highpass::Cutoff(cutoff) = *highpass {
                if !(cutoff.is_finite() && cutoff > 0.0) {
                    return Err(ConfigError::InvalidHighpassCutoff(cutoff));
                }
            }
        }
        for name in self.spectrum.iter().flatten() {
            validate_template_name(name)?;
        }
        Ok(())
    }
}

/// An axis must be non-empty, and no two values may format identically,
/// or two trials would share an identifier.
fn check_axis(axis: &'static str, values: impl Iterator<Item = String>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value.clone()) {
            return Err(ConfigError::DuplicateAxisValue { axis, value });
        }
    }
    if seen.is_empty() {
        return Err(ConfigError::EmptyAxis(axis));
    }
    Ok(())
}

impl SweepConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check everything that can be checked without reading the input files.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.object_name.is_empty()
            || self.object_name.contains('/')
            || self.object_name.contains('\\')
        {
            return Err(ConfigError::InvalidObjectName(self.object_name.clone()));
        }
        self.axes().validate()?;
        if self.numbasis.is_empty() {
            return Err(ConfigError::EmptyAxis("numbasis"));
        }
        if self.numbasis.contains(&0) {
            return Err(ConfigError::InvalidNumbasis(self.numbasis.clone()));
        }
        check_axis("numbasis", self.numbasis.iter().map(usize::to_string))?;
        self.injection_plan()?;
        Ok(())
    }

    pub fn injection_plan(&self) -> Result<InjectionPlan, ConfigError> {
        Ok(InjectionPlan::new(
            self.fake_fluxes.clone(),
            self.fake_seps.clone(),
            self.fake_pas.clone(),
            self.fake_fwhm,
        )?)
    }

    pub fn axes(&self) -> SweepAxes {
        SweepAxes {
            annuli: self.annuli.clone(),
            subsections: self.subsections.clone(),
            movement: self.movement.clone(),
            spectrum: self.spectrum.clone(),
            corr_smooth: self.corr_smooth.clone(),
            highpass: self.highpass.clone(),
        }
    }

    /// Resolve the input glob to a sorted list of files.
    pub fn input_files(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let entries = glob(&self.fileset).map_err(|source| ConfigError::InvalidGlob {
            pattern: self.fileset.clone(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(ConfigError::NoInputFiles(self.fileset.clone()));
        }
        Ok(files)
    }
}
