//! Sweep-level bookkeeping of failed trials and degenerate results.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::layout::OutputLayout;

const FAILURE_HEADER: [&str; 4] = ["trial", "phase", "artifact", "message"];
const DEGENERATE_HEADER: [&str; 4] = ["trial", "phase", "artifact", "reason"];

/// Phase of the sweep in which an event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Injection,
    Reduction,
    Contrast,
    Detection,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Injection => "injection",
            Phase::Reduction => "reduction",
            Phase::Contrast => "contrast",
            Phase::Detection => "detection",
        };
        write!(f, "{s}")
    }
}

/// A trial step that raised an error and was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub trial: String,
    pub phase: Phase,
    pub artifact: Option<String>,
    pub message: String,
}

/// A result that was computed but is numerically unusable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegenerateResult {
    pub trial: String,
    pub phase: Phase,
    pub artifact: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    failures: Vec<TrialFailure>,
    degenerate: Vec<DegenerateResult>,
}

impl SweepReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(
        &mut self,
        trial: &str,
        phase: Phase,
        artifact: Option<&Path>,
        message: impl Into<String>,
    ) {
        let failure = TrialFailure {
            trial: trial.to_string(),
            phase,
            artifact: artifact.map(|p| p.display().to_string()),
            message: message.into(),
        };
        warn!(
            "Trial {} failed during {}: {}",
            failure.trial, failure.phase, failure.message
        );
        self.failures.push(failure);
    }

    pub fn record_degenerate(
        &mut self,
        trial: &str,
        phase: Phase,
        artifact: &Path,
        reason: impl Into<String>,
    ) {
        let entry = DegenerateResult {
            trial: trial.to_string(),
            phase,
            artifact: artifact.display().to_string(),
            reason: reason.into(),
        };
        warn!(
            "Degenerate {} result for {} ({}): {}",
            entry.phase, entry.trial, entry.artifact, entry.reason
        );
        self.degenerate.push(entry);
    }

    pub fn failures(&self) -> &[TrialFailure] {
        &self.failures
    }

    pub fn degenerate(&self) -> &[DegenerateResult] {
        &self.degenerate
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.degenerate.is_empty()
    }

    /// Whether a trial has any recorded failure in the given phase
    pub fn has_failure(&self, trial: &str, phase: Phase) -> bool {
        self.failures
            .iter()
            .any(|f| f.trial == trial && f.phase == phase)
    }

    /// Write both logs into the object directory, replacing earlier copies.
    /// Empty logs still get their header row.
    pub fn write(&self, layout: &OutputLayout) -> Result<(), csv::Error> {
        write_rows(&layout.failures_path(), &FAILURE_HEADER, &self.failures)?;
        write_rows(&layout.degenerate_path(), &DEGENERATE_HEADER, &self.degenerate)
    }
}

fn write_rows<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<(), csv::Error> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    wtr.write_record(header)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a failure log written by [`SweepReport::write`].
pub fn read_failures(path: &Path) -> Result<Vec<TrialFailure>, csv::Error> {
    csv::Reader::from_path(path)?.deserialize().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::CubeFormat;
    use tempfile::TempDir;

    #[test]
    fn test_records_and_persists() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path(), "obj", CubeFormat::Json);
        layout.ensure().unwrap();

        let mut report = SweepReport::new();
        assert!(report.is_clean());
        report.record_failure(
            "1Annuli_",
            Phase::Reduction,
            None,
            "solver diverged",
        );
        report.record_failure(
            "2Annuli_",
            Phase::Contrast,
            Some(Path::new("obj/x.json")),
            "missing",
        );
        report.record_degenerate("2Annuli_", Phase::Contrast, Path::new("obj/c.csv"), "all NaN");

        assert!(report.has_failure("1Annuli_", Phase::Reduction));
        assert!(!report.has_failure("1Annuli_", Phase::Contrast));
        report.write(&layout).unwrap();

        let failures = read_failures(&layout.failures_path()).unwrap();
        assert_eq!(failures, report.failures());
        assert_eq!(failures[0].artifact, None);
        assert_eq!(failures[1].artifact.as_deref(), Some("obj/x.json"));

        let degenerate = std::fs::read_to_string(layout.degenerate_path()).unwrap();
        assert!(degenerate.starts_with("trial,phase,artifact,reason\n"));
        assert!(degenerate.contains("all NaN"));
    }

    #[test]
    fn test_clean_report_writes_header_only_logs() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path(), "obj", CubeFormat::Json);
        layout.ensure().unwrap();

        SweepReport::new().write(&layout).unwrap();
        assert_eq!(
            std::fs::read_to_string(layout.failures_path()).unwrap(),
            "trial,phase,artifact,message\n"
        );
        assert_eq!(
            std::fs::read_to_string(layout.degenerate_path()).unwrap(),
            "trial,phase,artifact,reason\n"
        );
        assert!(read_failures(&layout.failures_path()).unwrap().is_empty());
    }
}
