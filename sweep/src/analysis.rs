//! Post-hoc scoring of a finished sweep from its detection tables.
//!
//! Every detection table carries its trial identifier and basis count in its
//! filename, so grouping by an axis is a matter of parsing the name with
//! [`ArtifactName::parse`].

use log::warn;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::classify::{read_detection_table, ClassifiedCandidate};
use crate::layout::MANIFEST_FILE;
use crate::manifest::{ManifestError, SweepManifest};
use crate::params::{format_number, ArtifactName};

/// Radius within which a candidate is taken to be the known target.
pub const TARGET_MATCH_RADIUS_PX: f64 = 3.0;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Cannot list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read detection table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Unknown sweep axis '{0}' (expected annuli, subsections, movement, spectrum, smooth, highpass or numbasis)")]
    UnknownAxis(String),

    #[error("Sweep manifest unavailable: {0}")]
    Manifest(#[from] ManifestError),
}

/// An axis that detection tables can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAxis {
    Annuli,
    Subsections,
    Movement,
    Spectrum,
    Smooth,
    Highpass,
    Numbasis,
}

impl SweepAxis {
    /// The axis value of one artifact, formatted as in its identifier.
    pub fn value_of(&self, name: &ArtifactName) -> String {
        let p = &name.params;
        match self {
            SweepAxis::Annuli => p.annuli.to_string(),
            SweepAxis::Subsections => p.subsections.to_string(),
            SweepAxis::Movement => format_number(p.movement),
            SweepAxis::Spectrum => p.spectrum_label().to_string(),
            SweepAxis::Smooth => format_number(p.corr_smooth),
            SweepAxis::Highpass => p.highpass.to_string(),
            SweepAxis::Numbasis => name.numbasis.to_string(),
        }
    }
}

impl fmt::Display for SweepAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SweepAxis::Annuli => "Annuli",
            SweepAxis::Subsections => "Subsections",
            SweepAxis::Movement => "Movement",
            SweepAxis::Spectrum => "Spectrum",
            SweepAxis::Smooth => "Smooth",
            SweepAxis::Highpass => "Highpass",
            SweepAxis::Numbasis => "KL",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SweepAxis {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "annuli" => Ok(SweepAxis::Annuli),
            "subsections" => Ok(SweepAxis::Subsections),
            "movement" => Ok(SweepAxis::Movement),
            "spectrum" => Ok(SweepAxis::Spectrum),
            "smooth" | "corr_smooth" => Ok(SweepAxis::Smooth),
            "highpass" => Ok(SweepAxis::Highpass),
            "numbasis" | "kl" => Ok(SweepAxis::Numbasis),
            _ => Err(AnalysisError::UnknownAxis(s.to_string())),
        }
    }
}

/// One detection table and the trial it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionTable {
    pub path: PathBuf,
    pub name: ArtifactName,
    pub rows: Vec<ClassifiedCandidate>,
}

/// Load every detection table in a directory, ordered by filename.
///
/// Files whose names do not carry a trial identifier are skipped with a
/// warning.
pub fn load_detection_tables(dir: &Path) -> Result<Vec<DetectionTable>, AnalysisError> {
    let io_err = |source| AnalysisError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.extension().is_some_and(|e| e == "csv") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut tables = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let name = match ArtifactName::parse(file_name) {
            Ok(name) => name,
            Err(e) => {
                warn!("Skipping {}: {e}", path.display());
                continue;
            }
        };
        let rows = read_detection_table(&path).map_err(|source| AnalysisError::Csv {
            path: path.clone(),
            source,
        })?;
        tables.push(DetectionTable { path, name, rows });
    }
    Ok(tables)
}

/// Orders axis values numerically when both parse as numbers.
fn compare_values(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        _ => a.cmp(b),
    }
}

fn axis_values(tables: &[DetectionTable], axis: SweepAxis) -> Vec<String> {
    let mut values: Vec<String> = tables
        .iter()
        .map(|t| axis.value_of(&t.name))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    values.sort_by(|a, b| compare_values(a, b));
    values
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RocRow {
    #[serde(rename = "Param Value")]
    pub value: String,
    #[serde(rename = "SNR")]
    pub snr_threshold: f64,
    #[serde(rename = "Avg True Positives")]
    pub mean_true_positives: f64,
    #[serde(rename = "Avg False Positives")]
    pub mean_false_positives: f64,
}

/// Mean true- and false-positive counts per table for each axis value and
/// signal-to-noise threshold.
pub fn roc_table(tables: &[DetectionTable], axis: SweepAxis, snr_thresholds: &[f64]) -> Vec<RocRow> {
    let mut rows = Vec::new();
    for value in axis_values(tables, axis) {
        let group: Vec<&DetectionTable> = tables
            .iter()
            .filter(|t| axis.value_of(&t.name) == value)
            .collect();
        for &threshold in snr_thresholds {
            let (tp, fp) = group.iter().fold((0usize, 0usize), |(tp, fp), table| {
                let above = table.rows.iter().filter(|r| r.candidate.snr >= threshold);
                let injected = above.clone().filter(|r| r.injected).count();
                (tp + injected, fp + above.count() - injected)
            });
            let n = group.len() as f64;
            rows.push(RocRow {
                value: value.clone(),
                snr_threshold: threshold,
                mean_true_positives: tp as f64 / n,
                mean_false_positives: fp as f64 / n,
            });
        }
    }
    rows
}

/// One cell of a two-axis score table.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub first: String,
    pub second: String,
    /// Mean score of the tables in the cell
    pub value: f64,
    /// Number of tables that contributed
    pub tables: usize,
}

/// A table that did not contribute to a score, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

/// A score per (first axis value, second axis value) cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellTable {
    pub first: SweepAxis,
    pub second: SweepAxis,
    pub metric: &'static str,
    pub cells: Vec<Cell>,
    pub skipped: Vec<SkippedTable>,
}

/// Score each table, then average the finite scores within each cell.
/// Tables with a non-finite score are reported in `skipped`.
fn cell_table(
    tables: &[DetectionTable],
    first: SweepAxis,
    second: SweepAxis,
    metric: &'static str,
    score: impl Fn(&DetectionTable) -> f64,
) -> CellTable {
    let mut skipped = Vec::new();
    let scored: Vec<(&DetectionTable, f64)> = tables
        .iter()
        .filter_map(|t| {
            let s = score(t);
            if s.is_finite() {
                Some((t, s))
            } else {
                skipped.push(SkippedTable {
                    table: t.path.display().to_string(),
                    reason: format!("{metric} is not finite"),
                });
                None
            }
        })
        .collect();

    let mut cells = Vec::new();
    for a in axis_values(tables, first) {
        for b in axis_values(tables, second) {
            let values: Vec<f64> = scored
                .iter()
                .filter(|(t, _)| first.value_of(&t.name) == a && second.value_of(&t.name) == b)
                .map(|&(_, s)| s)
                .collect();
            if values.is_empty() {
                continue;
            }
            cells.push(Cell {
                first: a.clone(),
                second: b.clone(),
                value: values.iter().sum::<f64>() / values.len() as f64,
                tables: values.len(),
            });
        }
    }

    CellTable {
        first,
        second,
        metric,
        cells,
        skipped,
    }
}

/// Number of injected sources per detection table, from the sweep manifest
/// in `object_dir`.
pub fn injected_count(object_dir: &Path) -> Result<usize, AnalysisError> {
    let manifest = SweepManifest::read(&object_dir.join(MANIFEST_FILE))?;
    Ok(manifest.injections.fluxes.len() * manifest.injections.position_angles_deg.len())
}

/// Mean signal-to-noise of the injected sources, counting each of the
/// `injected_count` sources that was not detected as zero.
pub fn mean_injected_snr_table(
    tables: &[DetectionTable],
    first: SweepAxis,
    second: SweepAxis,
    injected_count: usize,
) -> CellTable {
    cell_table(tables, first, second, "Mean Injected SNR", |t| {
        let snrs: Vec<f64> = t
            .rows
            .iter()
            .filter(|r| r.injected)
            .map(|r| r.candidate.snr)
            .collect();
        let n = snrs.len().max(injected_count);
        snrs.iter().sum::<f64>() / n as f64
    })
}

/// Mean over tables of each table's highest signal-to-noise. A table with no
/// candidates has no maximum and is skipped.
pub fn max_snr_table(tables: &[DetectionTable], first: SweepAxis, second: SweepAxis) -> CellTable {
    cell_table(tables, first, second, "Max SNR", |t| {
        t.rows
            .iter()
            .map(|r| r.candidate.snr)
            .fold(f64::NAN, f64::max)
    })
}

/// Signal-to-noise of the first candidate within
/// [`TARGET_MATCH_RADIUS_PX`] of `target_xy` (relative to the star); a missed
/// target scores zero.
pub fn target_snr_table(
    tables: &[DetectionTable],
    first: SweepAxis,
    second: SweepAxis,
    target_xy: [f64; 2],
) -> CellTable {
    cell_table(tables, first, second, "Target SNR", |t| {
        t.rows
            .iter()
            .find(|r| {
                (r.candidate.x - target_xy[0]).hypot(r.candidate.y - target_xy[1])
                    < TARGET_MATCH_RADIUS_PX
            })
            .map_or(0.0, |r| r.candidate.snr)
    })
}

pub fn write_roc_table(path: &Path, rows: &[RocRow]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a cell table with columns `{first}`, `{second}`, `{metric}`, `Tables`.
pub fn write_cell_table(path: &Path, table: &CellTable) -> Result<(), csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record([
        table.first.to_string().as_str(),
        table.second.to_string().as_str(),
        table.metric,
        "Tables",
    ])?;
    for cell in &table.cells {
        wtr.serialize((&cell.first, &cell.second, cell.value, cell.tables))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_skipped_tables(path: &Path, skipped: &[SkippedTable]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in skipped {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::write_detection_table;
    use crate::detection::Candidate;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn row(snr: f64, x: f64, y: f64, injected: bool) -> ClassifiedCandidate {
        ClassifiedCandidate {
            candidate: Candidate {
                index: 1,
                snr,
                position_angle_deg: 0.0,
                separation_px: x.hypot(y),
                separation_as: x.hypot(y),
                x,
                y,
                row: 0,
                col: 0,
            },
            injected,
        }
    }

    fn id(annuli: u32, movement: &str) -> String {
        format!("{annuli}Annuli_2Subsections_{movement}Movement_NoneSpectrum_1Smooth_TrueHighpass_")
    }

    /// Four tables over annuli {2, 10} x movement {1, 2.5}, plus a stray file.
    fn sweep_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let write = |annuli, movement, rows: &[ClassifiedCandidate]| {
            let path = dir
                .path()
                .join(format!("{}_KL5_SNR-3.csv", id(annuli, movement)));
            write_detection_table(&path, rows).unwrap();
        };
        write(2, "1", &[row(8.0, -20.0, 0.0, true), row(4.0, 5.0, 30.0, false)]);
        write(2, "2.5", &[row(6.0, -20.0, 0.5, true)]);
        write(10, "1", &[]);
        write(
            10,
            "2.5",
            &[row(3.5, 1.0, 40.0, false), row(3.2, -19.0, 1.0, true)],
        );
        std::fs::write(dir.path().join("summary.csv"), "a,b\n").unwrap();
        dir
    }

    #[test]
    fn test_axis_names() {
        assert_eq!("Annuli".parse::<SweepAxis>().unwrap(), SweepAxis::Annuli);
        assert_eq!("kl".parse::<SweepAxis>().unwrap(), SweepAxis::Numbasis);
        assert!("colour".parse::<SweepAxis>().is_err());
    }

    #[test]
    fn test_load_skips_foreign_files() {
        let dir = sweep_dir();
        let tables = load_detection_tables(dir.path()).unwrap();
        assert_eq!(tables.len(), 4);
        assert!(tables.iter().all(|t| t.name.numbasis == 5));
        assert_eq!(axis_values(&tables, SweepAxis::Annuli), vec!["2", "10"]);
        assert_eq!(axis_values(&tables, SweepAxis::Movement), vec!["1", "2.5"]);
    }

    #[test]
    fn test_roc_counts() {
        let tables = load_detection_tables(sweep_dir().path()).unwrap();
        let rows = roc_table(&tables, SweepAxis::Annuli, &[3.0, 5.0]);
        assert_eq!(rows.len(), 4);

        // annuli 2 at SNR 3: tables have (1 TP, 1 FP) and (1 TP, 0 FP).
        assert_eq!(rows[0].value, "2");
        assert_relative_eq!(rows[0].mean_true_positives, 1.0);
        assert_relative_eq!(rows[0].mean_false_positives, 0.5);
        // annuli 2 at SNR 5 drops the 4-sigma false positive.
        assert_relative_eq!(rows[1].mean_false_positives, 0.0);
        // annuli 10 at SNR 3: (0, 0) and (1, 1).
        assert_eq!(rows[2].value, "10");
        assert_relative_eq!(rows[2].mean_true_positives, 0.5);
        assert_relative_eq!(rows[2].mean_false_positives, 0.5);
    }

    #[test]
    fn test_mean_injected_counts_misses_as_zero() {
        let tables = load_detection_tables(sweep_dir().path()).unwrap();
        let table = mean_injected_snr_table(&tables, SweepAxis::Annuli, SweepAxis::Movement, 2);
        assert_eq!(table.cells.len(), 4);
        assert!(table.skipped.is_empty());
        let cell = |a: &str, m: &str| {
            table
                .cells
                .iter()
                .find(|c| c.first == a && c.second == m)
                .unwrap()
                .value
        };
        assert_relative_eq!(cell("2", "1"), 4.0);
        assert_relative_eq!(cell("2", "2.5"), 3.0);
        assert_relative_eq!(cell("10", "1"), 0.0);
        assert_relative_eq!(cell("10", "2.5"), 1.6);

        // Nothing injected: the empty table scores 0/0.
        let degenerate = mean_injected_snr_table(&tables, SweepAxis::Annuli, SweepAxis::Movement, 0);
        assert_eq!(degenerate.skipped.len(), 1);
    }

    #[test]
    fn test_max_and_target_tables() {
        let tables = load_detection_tables(sweep_dir().path()).unwrap();

        let max = max_snr_table(&tables, SweepAxis::Annuli, SweepAxis::Numbasis);
        // The empty table has no maximum.
        assert_eq!(max.skipped.len(), 1);
        assert_eq!(max.cells.len(), 2);
        assert_relative_eq!(max.cells[0].value, 7.0);
        assert_relative_eq!(max.cells[1].value, 3.5);

        let target = target_snr_table(&tables, SweepAxis::Annuli, SweepAxis::Numbasis, [-20.0, 0.0]);
        assert!(target.skipped.is_empty());
        // annuli 2: 8 and 6; annuli 10: a miss (0) and a hit 1.4 px away.
        assert_relative_eq!(target.cells[0].value, 7.0);
        assert_relative_eq!(target.cells[1].value, 1.6);
    }

    #[test]
    fn test_cell_table_csv() {
        let dir = TempDir::new().unwrap();
        let tables = load_detection_tables(sweep_dir().path()).unwrap();
        let table = max_snr_table(&tables, SweepAxis::Annuli, SweepAxis::Movement);
        let path = dir.path().join("max.csv");
        write_cell_table(&path, &table).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next().unwrap(), "Annuli,Movement,Max SNR,Tables");
        assert_eq!(text.lines().count(), 1 + table.cells.len());
    }
}
