//! The reduction step: turning an input sequence into reduced cubes.
//!
//! The sweep does not care how a reduction is performed. It hands a
//! [`Reducer`] the input cube and a [`ReductionJob`] describing the parameter
//! set and where each output must land, then reads those outputs back during
//! measurement.

pub mod adi;

pub use adi::ClassicalAdi;

use serde::{Deserialize, Serialize};
use shared::image_proc::FilterError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::cube::{CubeFormat, CubeIoError, DataCube};
use crate::params::ParameterSet;

#[derive(Error, Debug)]
pub enum ReductionError {
    #[error("Reduction failed: {0}")]
    Failed(String),

    #[error("Reduction could not write output: {0}")]
    CubeIo(#[from] CubeIoError),

    #[error("Highpass filter failed: {0}")]
    Filter(#[from] FilterError),

    #[error("Unknown reduction mode '{0}' (expected ADI, SDI or ADI+SDI)")]
    UnknownMode(String),
}

/// Which differential imaging axes the reduction exploits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReductionMode {
    #[serde(rename = "ADI")]
    Adi,
    #[serde(rename = "SDI")]
    Sdi,
    #[default]
    #[serde(rename = "ADI+SDI")]
    AdiSdi,
}

impl fmt::Display for ReductionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReductionMode::Adi => "ADI",
            ReductionMode::Sdi => "SDI",
            ReductionMode::AdiSdi => "ADI+SDI",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ReductionMode {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADI" => Ok(ReductionMode::Adi),
            "SDI" => Ok(ReductionMode::Sdi),
            "ADI+SDI" | "SDI+ADI" => Ok(ReductionMode::AdiSdi),
            _ => Err(ReductionError::UnknownMode(s.to_string())),
        }
    }
}

/// Everything a reducer needs to produce the outputs for one trial variant.
#[derive(Debug, Clone)]
pub struct ReductionJob<'a> {
    /// Directory the reduced cubes are written into
    pub output_dir: &'a Path,
    /// Filename prefix, `{object}_{withfakes|withoutfakes}_{identifier}`
    pub file_prefix: String,
    pub params: &'a ParameterSet,
    /// Basis counts to produce; one output cube each
    pub numbasis: &'a [usize],
    /// Highpass Gaussian width in pixels, if filtering is on
    pub highpass_sigma_px: Option<f64>,
    pub mode: ReductionMode,
    pub format: CubeFormat,
}

impl ReductionJob<'_> {
    /// Where the cube for one basis count must be written.
    pub fn output_path(&self, numbasis: usize) -> PathBuf {
        self.output_dir.join(format!(
            "{}-KL{}-speccube.{}",
            self.file_prefix,
            numbasis,
            self.format.extension()
        ))
    }
}

/// A post-processing algorithm run once per trial variant.
///
/// Implementations must write one reduced cube per entry of
/// `job.numbasis` to `job.output_path(n)`, north-up and calibrated in the
/// same units as the input.
pub trait Reducer {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn reduce(&self, cube: &DataCube, job: &ReductionJob<'_>) -> Result<(), ReductionError>;
}
