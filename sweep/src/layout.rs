//! Output directory layout for one object.
//!
//! ```text
//! {root}/{object}/
//!     klipped_cubes_Wfakes/{object}_withfakes_{id}-KL{n}-speccube.{ext}
//!     klipped_cubes_Nfakes/{object}_withoutfakes_{id}-KL{n}-speccube.{ext}
//!     calibrated_contrast/{id}_KL{n}_contrast.{csv,svg}
//!     uncalibrated_contrast/{id}_KL{n}_contrast.{csv,svg}
//!     detections/{id}_KL{n}_SNR-{threshold}.csv
//!     sweep_manifest.json
//!     failed_artifacts.csv
//!     degenerate_results.csv
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::cube::CubeFormat;
use crate::params::format_number;

pub const DETECTIONS_DIR: &str = "detections";
pub const MANIFEST_FILE: &str = "sweep_manifest.json";

/// Which copy of the input sequence a reduced cube came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CubeVariant {
    WithFakes,
    WithoutFakes,
}

impl CubeVariant {
    pub fn directory_name(&self) -> &'static str {
        match self {
            CubeVariant::WithFakes => "klipped_cubes_Wfakes",
            CubeVariant::WithoutFakes => "klipped_cubes_Nfakes",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            CubeVariant::WithFakes => "withfakes",
            CubeVariant::WithoutFakes => "withoutfakes",
        }
    }
}

/// Resolves every output path of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    object_name: String,
    object_dir: PathBuf,
    format: CubeFormat,
}

impl OutputLayout {
    pub fn new(output_root: &Path, object_name: &str, format: CubeFormat) -> Self {
        Self {
            object_name: object_name.to_string(),
            object_dir: output_root.join(object_name),
            format,
        }
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn object_dir(&self) -> &Path {
        &self.object_dir
    }

    pub fn format(&self) -> CubeFormat {
        self.format
    }

    pub fn reduced_dir(&self, variant: CubeVariant) -> PathBuf {
        self.object_dir.join(variant.directory_name())
    }

    pub fn contrast_dir(&self, calibrated: bool) -> PathBuf {
        self.object_dir.join(if calibrated {
            "calibrated_contrast"
        } else {
            "uncalibrated_contrast"
        })
    }

    pub fn detections_dir(&self) -> PathBuf {
        self.object_dir.join(DETECTIONS_DIR)
    }

    /// `{object}_{withfakes|withoutfakes}_{identifier}`
    pub fn reduced_prefix(&self, variant: CubeVariant, identifier: &str) -> String {
        format!("{}_{}_{}", self.object_name, variant.tag(), identifier)
    }

    pub fn reduced_cube_path(&self, variant: CubeVariant, identifier: &str, numbasis: usize) -> PathBuf {
        self.reduced_dir(variant).join(format!(
            "{}-KL{}-speccube.{}",
            self.reduced_prefix(variant, identifier),
            numbasis,
            self.format.extension()
        ))
    }

    pub fn contrast_table_path(&self, calibrated: bool, identifier: &str, numbasis: usize) -> PathBuf {
        self.contrast_dir(calibrated)
            .join(format!("{identifier}_KL{numbasis}_contrast.csv"))
    }

    pub fn contrast_plot_path(&self, calibrated: bool, identifier: &str, numbasis: usize) -> PathBuf {
        self.contrast_table_path(calibrated, identifier, numbasis)
            .with_extension("svg")
    }

    pub fn detection_table_path(&self, identifier: &str, numbasis: usize, snr_threshold: f64) -> PathBuf {
        self.detections_dir().join(format!(
            "{identifier}_KL{numbasis}_SNR-{}.csv",
            format_number(snr_threshold)
        ))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.object_dir.join(MANIFEST_FILE)
    }

    pub fn failures_path(&self) -> PathBuf {
        self.object_dir.join("failed_artifacts.csv")
    }

    pub fn degenerate_path(&self) -> PathBuf {
        self.object_dir.join("degenerate_results.csv")
    }

    /// Create every output directory. Safe to call repeatedly.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.object_dir.clone(),
            self.reduced_dir(CubeVariant::WithFakes),
            self.reduced_dir(CubeVariant::WithoutFakes),
            self.contrast_dir(true),
            self.contrast_dir(false),
            self.detections_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ArtifactName;
    use tempfile::TempDir;

    const ID: &str = "5Annuli_4Subsections_1Movement_NoneSpectrum_1Smooth_TrueHighpass_";

    #[test]
    fn test_paths() {
        let layout = OutputLayout::new(Path::new("/out"), "HD1160", CubeFormat::Json);
        assert_eq!(
            layout.reduced_cube_path(CubeVariant::WithoutFakes, ID, 3),
            PathBuf::from(format!(
                "/out/HD1160/klipped_cubes_Nfakes/HD1160_withoutfakes_{ID}-KL3-speccube.json"
            ))
        );
        assert_eq!(
            layout.contrast_plot_path(true, ID, 3),
            PathBuf::from(format!("/out/HD1160/calibrated_contrast/{ID}_KL3_contrast.svg"))
        );
        assert_eq!(
            layout.detection_table_path(ID, 3, 3.0),
            PathBuf::from(format!("/out/HD1160/detections/{ID}_KL3_SNR-3.csv"))
        );
        assert_eq!(
            layout.detection_table_path(ID, 3, 2.5).file_name().unwrap(),
            format!("{ID}_KL3_SNR-2.5.csv").as_str()
        );
    }

    #[test]
    fn test_every_artifact_name_parses() {
        let layout = OutputLayout::new(Path::new("out"), "HIP_99", CubeFormat::Fits);
        let paths = [
            layout.reduced_cube_path(CubeVariant::WithFakes, ID, 12),
            layout.contrast_table_path(false, ID, 12),
            layout.detection_table_path(ID, 12, 3.0),
        ];
        for path in paths {
            let name = path.file_name().unwrap().to_str().unwrap();
            let parsed = ArtifactName::parse(name).unwrap();
            assert_eq!(parsed.numbasis, 12);
            assert_eq!(parsed.params.identifier(), ID);
        }
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path(), "obj", CubeFormat::Json);
        layout.ensure().unwrap();
        layout.ensure().unwrap();
        assert!(layout.detections_dir().is_dir());
        assert!(layout.reduced_dir(CubeVariant::WithFakes).is_dir());
        assert!(layout.contrast_dir(false).is_dir());
    }
}
