//! Label detection candidates as injected sources or unrelated peaks, and
//! persist the labelled table.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detection::Candidate;
use crate::injection::InjectionPlan;

/// Fixed separation tolerance, in pixels.
pub const SEPARATION_TOLERANCE_PX: f64 = 2.0;

/// Tolerances for matching a candidate to the injected population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchingRule {
    /// Largest position-angle difference (exclusive)
    pub position_angle_tolerance: f64,
    /// Largest separation difference (exclusive), applied to both the pixel
    /// and the angular separation
    pub separation_tolerance: f64,
}

impl MatchingRule {
    /// Rule used by the sweep: half the injection FWHM in position angle and
    /// two pixels in separation.
    pub fn for_fwhm(fwhm_px: f64) -> Self {
        Self {
            position_angle_tolerance: 0.5 * fwhm_px,
            separation_tolerance: SEPARATION_TOLERANCE_PX,
        }
    }

    /// A candidate matches only if every difference is strictly inside its
    /// tolerance; a difference exactly on the tolerance does not match.
    pub fn matches(&self, candidate: &Candidate, plan: &InjectionPlan) -> bool {
        let closest = |values: &[f64], target: f64| {
            values
                .iter()
                .map(|v| (target - v).abs())
                .fold(f64::INFINITY, f64::min)
        };
        let pa_diff = closest(plan.position_angles_deg(), candidate.position_angle_deg);
        let sep_diff = closest(plan.separations_px(), candidate.separation_px);
        let sep_as_diff = closest(plan.separations_px(), candidate.separation_as);

        pa_diff < self.position_angle_tolerance
            && sep_diff < self.separation_tolerance
            && sep_as_diff < self.separation_tolerance
    }
}

/// A candidate with its injected/unrelated label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedCandidate {
    pub candidate: Candidate,
    pub injected: bool,
}

/// Label every candidate against the injected population.
pub fn classify(
    candidates: Vec<Candidate>,
    plan: &InjectionPlan,
    rule: &MatchingRule,
) -> Vec<ClassifiedCandidate> {
    candidates
        .into_iter()
        .map(|candidate| ClassifiedCandidate {
            injected: rule.matches(&candidate, plan),
            candidate,
        })
        .collect()
}

const DETECTION_HEADER: [&str; 10] = [
    "Index",
    "SNR Value",
    "PA",
    "Sep (pix)",
    "Sep (as)",
    "x",
    "y",
    "row",
    "col",
    "Injected",
];

#[derive(Debug, Serialize, Deserialize)]
struct DetectionRecord {
    #[serde(rename = "Index")]
    index: usize,
    #[serde(rename = "SNR Value")]
    snr: f64,
    #[serde(rename = "PA")]
    pa: f64,
    #[serde(rename = "Sep (pix)")]
    sep_px: f64,
    #[serde(rename = "Sep (as)")]
    sep_as: f64,
    x: f64,
    y: f64,
    row: usize,
    col: usize,
    #[serde(rename = "Injected")]
    injected: String,
}

impl From<&ClassifiedCandidate> for DetectionRecord {
    fn from(row: &ClassifiedCandidate) -> Self {
        let c = &row.candidate;
        Self {
            index: c.index,
            snr: c.snr,
            pa: c.position_angle_deg,
            sep_px: c.separation_px,
            sep_as: c.separation_as,
            x: c.x,
            y: c.y,
            row: c.row,
            col: c.col,
            injected: if row.injected { "True" } else { "False" }.to_string(),
        }
    }
}

/// Write the classified candidate table. The header is always written, so an
/// empty detection list still yields a valid table.
pub fn write_detection_table(path: &Path, rows: &[ClassifiedCandidate]) -> Result<(), csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record(DETECTION_HEADER)?;
    for row in rows {
        wtr.serialize(DetectionRecord::from(row))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a table written by [`write_detection_table`].
pub fn read_detection_table(path: &Path) -> Result<Vec<ClassifiedCandidate>, csv::Error> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in rdr.deserialize() {
        let record: DetectionRecord = record?;
        rows.push(ClassifiedCandidate {
            candidate: Candidate {
                index: record.index,
                snr: record.snr,
                position_angle_deg: record.pa,
                separation_px: record.sep_px,
                separation_as: record.sep_as,
                x: record.x,
                y: record.y,
                row: record.row,
                col: record.col,
            },
            injected: record.injected.eq_ignore_ascii_case("true"),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn plan() -> InjectionPlan {
        InjectionPlan::new(vec![1e-4, 5e-5], vec![20.0, 40.0], vec![0.0, 90.0], 6.0).unwrap()
    }

    fn candidate(pa: f64, sep: f64) -> Candidate {
        Candidate {
            index: 1,
            snr: 5.0,
            position_angle_deg: pa,
            separation_px: sep,
            separation_as: sep,
            x: 0.0,
            y: 0.0,
            row: 0,
            col: 0,
        }
    }

    #[test]
    fn test_exact_match() {
        let rule = MatchingRule::for_fwhm(6.0);
        assert!(rule.matches(&candidate(90.0, 20.0), &plan()));
        assert!(rule.matches(&candidate(2.9, 41.5), &plan()));
        assert!(!rule.matches(&candidate(45.0, 20.0), &plan()));
        assert!(!rule.matches(&candidate(90.0, 30.0), &plan()));
    }

    #[test]
    fn test_boundaries_are_not_injected() {
        let rule = MatchingRule::for_fwhm(6.0);
        // Exactly half a FWHM away in position angle.
        assert!(!rule.matches(&candidate(93.0, 20.0), &plan()));
        assert!(rule.matches(&candidate(92.999, 20.0), &plan()));
        // Exactly two pixels away in separation.
        assert!(!rule.matches(&candidate(90.0, 22.0), &plan()));
        assert!(rule.matches(&candidate(90.0, 21.999), &plan()));
    }

    #[test]
    fn test_angular_separation_is_checked() {
        let rule = MatchingRule::for_fwhm(6.0);
        let mut c = candidate(0.0, 20.0);
        c.separation_as = 20.0 * 0.0162;
        assert!(!rule.matches(&c, &plan()));
    }

    #[test]
    fn test_position_angle_does_not_wrap() {
        let rule = MatchingRule::for_fwhm(6.0);
        assert!(!rule.matches(&candidate(359.0, 20.0), &plan()));
    }

    #[test]
    fn test_table_round_trip_and_labels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("det.csv");
        let rows = classify(
            vec![candidate(90.0, 20.0), candidate(200.0, 31.0)],
            &plan(),
            &MatchingRule::for_fwhm(6.0),
        );
        write_detection_table(&path, &rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Index,SNR Value,PA,Sep (pix),Sep (as),x,y,row,col,Injected"
        );
        assert!(lines.next().unwrap().ends_with(",True"));
        assert!(lines.next().unwrap().ends_with(",False"));

        assert_eq!(read_detection_table(&path).unwrap(), rows);
    }

    #[test]
    fn test_empty_table_has_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        write_detection_table(&path, &[]).unwrap();
        assert!(read_detection_table(&path).unwrap().is_empty());
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
