//! Structured record of what a sweep ran, written next to its outputs.
//!
//! Downstream tools read the swept axes and trial identifiers from
//! `sweep_manifest.json` instead of scraping log text.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::SweepAxes;
use crate::cube::CubeFormat;
use crate::injection::InjectionPlan;
use crate::params::{IdentifierError, ParameterSet};
use crate::reduction::ReductionMode;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The injected population as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionSummary {
    pub fluxes: Vec<f64>,
    pub separations_px: Vec<f64>,
    pub position_angles_deg: Vec<f64>,
    pub fwhm_px: f64,
}

impl From<&InjectionPlan> for InjectionSummary {
    fn from(plan: &InjectionPlan) -> Self {
        Self {
            fluxes: plan.fluxes().to_vec(),
            separations_px: plan.separations_px().to_vec(),
            position_angles_deg: plan.position_angles_deg().to_vec(),
            fwhm_px: plan.fwhm_px(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepManifest {
    pub object_name: String,
    /// RFC 3339 creation time
    pub created_utc: String,
    pub axes: SweepAxes,
    pub numbasis: Vec<usize>,
    pub injections: InjectionSummary,
    pub mode: ReductionMode,
    pub cube_format: CubeFormat,
    pub snr_threshold: f64,
    /// Identifier of every trial, in sweep order
    pub trials: Vec<String>,
}

impl SweepManifest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        object_name: &str,
        axes: SweepAxes,
        numbasis: &[usize],
        injections: &InjectionPlan,
        mode: ReductionMode,
        cube_format: CubeFormat,
        snr_threshold: f64,
        trials: Vec<String>,
    ) -> Self {
        Self {
            object_name: object_name.to_string(),
            created_utc: Utc::now().to_rfc3339(),
            axes,
            numbasis: numbasis.to_vec(),
            injections: injections.into(),
            mode,
            cube_format,
            snr_threshold,
            trials,
        }
    }

    /// Parameter sets of every trial, recovered from their identifiers.
    pub fn trial_params(&self) -> Result<Vec<ParameterSet>, IdentifierError> {
        self.trials
            .iter()
            .map(|id| ParameterSet::from_identifier(id))
            .collect()
    }

    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        let io_err = |source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| ManifestError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)
    }

    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let file = File::open(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ManifestError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Highpass;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sweep_manifest.json");
        let axes = SweepAxes {
            annuli: vec![3, 5],
            subsections: vec![1],
            movement: vec![1.0],
            spectrum: vec![None, Some("methane".to_string())],
            corr_smooth: vec![1.0],
            highpass: vec![Highpass::Enabled(true)],
        };
        let trials: Vec<String> = axes.expand().iter().map(ParameterSet::identifier).collect();
        let plan = InjectionPlan::new(vec![1e-4], vec![20.0], vec![0.0, 120.0], 3.5).unwrap();
        let manifest = SweepManifest::new(
            "HD1160",
            axes.clone(),
            &[1, 10],
            &plan,
            ReductionMode::AdiSdi,
            CubeFormat::Json,
            3.0,
            trials,
        );
        manifest.write(&path).unwrap();

        let read = SweepManifest::read(&path).unwrap();
        assert_eq!(read, manifest);
        assert_eq!(read.trial_params().unwrap(), axes.expand());
        assert!(chrono::DateTime::parse_from_rfc3339(&read.created_utc).is_ok());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let err = SweepManifest::read(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }
}
