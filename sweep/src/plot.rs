//! Contrast curve plots.

use plotters::prelude::*;
use std::error::Error;
use std::path::Path;

use crate::contrast::ContrastCurve;

/// Render a contrast curve as an SVG line plot with a logarithmic y axis.
///
/// Only finite, positive points can be shown on a log axis; a curve without
/// any is an error.
pub fn write_contrast_plot(
    path: &Path,
    curve: &ContrastCurve,
    title: &str,
    y_label: &str,
) -> Result<(), Box<dyn Error>> {
    let points: Vec<(f64, f64)> = curve
        .finite_points()
        .into_iter()
        .filter(|&(_, c)| c > 0.0)
        .collect();
    if points.is_empty() {
        return Err(format!("no positive contrast values to plot in '{title}'").into());
    }

    let (min_sep, max_sep) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(s, _)| {
            (lo.min(s), hi.max(s))
        });
    let (min_c, max_c) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, c)| {
            (lo.min(c), hi.max(c))
        });
    // A single point still needs a non-empty range.
    let x_range = if max_sep > min_sep {
        min_sep..max_sep
    } else {
        (min_sep - 1.0)..(max_sep + 1.0)
    };

    let root = SVGBackend::new(path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range, ((min_c * 0.5)..(max_c * 2.0)).log_scale())?;

    chart
        .configure_mesh()
        .x_desc("Separation (pixels)")
        .y_desc(y_label)
        .y_label_formatter(&|v| format!("{v:.0e}"))
        .draw()?;

    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
    chart.draw_series(
        points
            .iter()
            .map(|&(s, c)| Circle::new((s, c), 3, BLUE.filled())),
    )?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writes_svg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("curve.svg");
        let curve = ContrastCurve {
            separations_px: vec![8.0, 14.0, 20.0, 26.0],
            contrast: vec![1e-3, 2e-4, f64::NAN, 5e-5],
        };
        write_contrast_plot(&path, &curve, "test", "Contrast").unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_degenerate_curve_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nan.svg");
        let curve = ContrastCurve {
            separations_px: vec![8.0, 14.0],
            contrast: vec![f64::NAN, -1.0],
        };
        assert!(write_contrast_plot(&path, &curve, "test", "Contrast").is_err());
        assert!(!path.exists());
    }
}
