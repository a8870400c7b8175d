//! Radial contrast curves and algorithm-throughput calibration.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use shared::image_proc::gaussian::fwhm_to_sigma;
use shared::image_proc::{nan_gaussian_filter, radius_map, FilterError, SampleStats};
use std::f64::consts::PI;
use std::path::Path;

use crate::injection::{retrieve_flux, InjectionPlan};
use crate::instrument::ApertureGeometry;

/// Knobs for contrast measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContrastSettings {
    /// Channel of the reduced cube that is measured
    pub wavelength_index: usize,
    /// Radius in pixels of the flux-retrieval fit around each injected source
    pub search_radius_px: f64,
    /// Smooth the frame with a Gaussian of sigma FWHM/2.355 before measuring
    pub low_pass_filter: bool,
    /// Detection significance of the curve, in standard deviations
    pub sigma_level: f64,
}

impl Default for ContrastSettings {
    fn default() -> Self {
        Self {
            wavelength_index: 10,
            search_radius_px: 7.0,
            low_pass_filter: true,
            sigma_level: 5.0,
        }
    }
}

/// Contrast as a function of separation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastCurve {
    pub separations_px: Vec<f64>,
    pub contrast: Vec<f64>,
}

impl ContrastCurve {
    pub fn len(&self) -> usize {
        self.separations_px.len()
    }

    pub fn is_empty(&self) -> bool {
        self.separations_px.is_empty()
    }

    /// Points where both separation and contrast are finite
    pub fn finite_points(&self) -> Vec<(f64, f64)> {
        self.separations_px
            .iter()
            .zip(&self.contrast)
            .filter(|(s, c)| s.is_finite() && c.is_finite())
            .map(|(&s, &c)| (s, c))
            .collect()
    }

    /// True when no point of the curve is usable
    pub fn is_degenerate(&self) -> bool {
        self.finite_points().is_empty()
    }
}

/// Separations at which contrast is sampled: one per resolution element
/// between the inner and outer working angle.
pub fn contrast_separations(geometry: &ApertureGeometry) -> Vec<f64> {
    let ApertureGeometry {
        fwhm_px,
        inner_working_angle_px: iwa,
        outer_working_angle_px: owa,
    } = *geometry;
    if !(fwhm_px > 0.0) || owa <= iwa {
        return Vec::new();
    }
    let count = ((owa - iwa) / fwhm_px).floor() as usize;
    (0..count)
        .map(|k| iwa + fwhm_px / 2.0 + k as f64 * fwhm_px)
        .collect()
}

/// Measure the detection-limit contrast curve of a calibrated frame.
///
/// At each separation the annulus `|r - sep| < FWHM/2` is sampled and the
/// contrast is `mean + sigma_level * std * sqrt(1 + 1/n)`, where `std` uses
/// one delta degree of freedom and `n` is the number of independent
/// resolution elements around the annulus. NaN pixels are ignored; annuli with
/// fewer than two finite pixels give NaN. Low-pass smoothing fails for a
/// non-positive FWHM.
pub fn measure_contrast(
    frame: &ArrayView2<f64>,
    geometry: &ApertureGeometry,
    center: [f64; 2],
    settings: &ContrastSettings,
) -> Result<ContrastCurve, FilterError> {
    let filtered;
    let frame = if settings.low_pass_filter {
        filtered = nan_gaussian_filter(frame, fwhm_to_sigma(geometry.fwhm_px))?;
        filtered.view()
    } else {
        frame.view()
    };

    let radii = radius_map(frame.dim(), center);
    let half_width = geometry.fwhm_px / 2.0;
    let separations_px = contrast_separations(geometry);

    let contrast = separations_px
        .iter()
        .map(|&sep| {
            let annulus = radii
                .iter()
                .zip(frame.iter())
                .filter(|(&r, _)| (r - sep).abs() < half_width)
                .map(|(_, &v)| v);
            let Some(stats) = SampleStats::from_values(annulus) else {
                return f64::NAN;
            };
            let elements = (2.0 * PI * sep / geometry.fwhm_px).floor().max(1.0);
            stats.mean + settings.sigma_level * stats.std(1) * (1.0 + 1.0 / elements).sqrt()
        })
        .collect();

    Ok(ContrastCurve {
        separations_px,
        contrast,
    })
}

/// Fraction of injected flux that survives reduction, per injected separation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputCurve {
    pub separations_px: Vec<f64>,
    pub throughput: Vec<f64>,
}

impl ThroughputCurve {
    /// Throughput at the injected separation nearest to `separation_px`.
    /// Ties go to the first listed separation.
    pub fn nearest(&self, separation_px: f64) -> f64 {
        let mut best: Option<(f64, f64)> = None;
        for (&sep, &value) in self.separations_px.iter().zip(&self.throughput) {
            let distance = (sep - separation_px).abs();
            match best {
                Some((best_distance, _)) if distance >= best_distance => {}
                _ => best = Some((distance, value)),
            }
        }
        best.map_or(f64::NAN, |(_, value)| value)
    }

    /// True when any throughput is NaN, infinite or zero
    pub fn is_degenerate(&self) -> bool {
        self.throughput.iter().any(|t| !t.is_finite() || *t == 0.0)
    }
}

/// Measure throughput from the recovered fluxes of the injected population.
///
/// Recovered flux is averaged over position angles at each separation and
/// divided by the injected flux paired with that separation.
pub fn algorithm_throughput(
    frame: &ArrayView2<f64>,
    center: [f64; 2],
    plan: &InjectionPlan,
    search_radius: f64,
) -> ThroughputCurve {
    let throughput = plan
        .fluxes()
        .iter()
        .zip(plan.separations_px())
        .map(|(&flux, &sep)| {
            let recovered: Vec<f64> = plan
                .position_angles_deg()
                .iter()
                .map(|&pa| retrieve_flux(frame, center, sep, pa, plan.fwhm_px(), search_radius))
                .collect();
            let mean = recovered.iter().sum::<f64>() / recovered.len() as f64;
            mean / flux
        })
        .collect();

    ThroughputCurve {
        separations_px: plan.separations_px().to_vec(),
        throughput,
    }
}

/// Divide each point of a raw curve by the throughput at the nearest
/// injected separation.
pub fn calibrate_contrast(raw: &ContrastCurve, throughput: &ThroughputCurve) -> ContrastCurve {
    ContrastCurve {
        separations_px: raw.separations_px.clone(),
        contrast: raw
            .separations_px
            .iter()
            .zip(&raw.contrast)
            .map(|(&sep, &c)| c / throughput.nearest(sep))
            .collect(),
    }
}

/// Blank a disk of `radius` around `xy` (`[x, y]`) with NaN.
pub fn mask_circle(frame: &mut Array2<f64>, xy: [f64; 2], radius: f64) {
    for ((row, col), value) in frame.indexed_iter_mut() {
        if (col as f64 - xy[0]).hypot(row as f64 - xy[1]) <= radius {
            *value = f64::NAN;
        }
    }
}

/// Write a contrast curve as CSV with columns `Separation` and `column`.
///
/// Non-finite points are left out; the number dropped is returned so the
/// caller can report degenerate curves.
pub fn write_contrast_table(
    path: &Path,
    curve: &ContrastCurve,
    column: &str,
) -> Result<usize, csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record(["Separation", column])?;

    let points = curve.finite_points();
    for &(separation, contrast) in &points {
        wtr.serialize((separation, contrast))?;
    }
    wtr.flush()?;
    Ok(curve.len() - points.len())
}

/// Read back a table written by [`write_contrast_table`].
pub fn read_contrast_table(path: &Path) -> Result<ContrastCurve, csv::Error> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut curve = ContrastCurve {
        separations_px: Vec::new(),
        contrast: Vec::new(),
    };
    for record in rdr.deserialize() {
        let (separation, contrast): (f64, f64) = record?;
        curve.separations_px.push(separation);
        curve.contrast.push(contrast);
    }
    Ok(curve)
}
