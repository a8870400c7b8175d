//! Point-source candidate detection on reduced cubes.
//!
//! The pipeline is:
//! 1. collapse the spectral cube with flat weights,
//! 2. cross-correlate with a Gaussian matched filter,
//! 3. convert to a per-pixel signal-to-noise map using annular statistics,
//! 4. greedily pick the brightest peaks above threshold.
//!
//! Candidate positions are reported relative to the star, with position angles
//! measured east of north (north along +y, east along -x).

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use shared::image_proc::gaussian::{fwhm_to_sigma, gaussian_kernel};
use shared::image_proc::{convolve2d_same, radius_map};

use crate::injection::position_angle_deg;

/// Knobs for candidate detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum signal-to-noise of a reported candidate
    pub snr_threshold: f64,
    /// Half width of the matched-filter kernel in pixels
    pub kernel_half_width: usize,
    /// Pixels closer than this to the pixel under test are left out of its
    /// noise estimate
    pub pixel_mask_radius: f64,
    /// Radial half width of the annulus used for the noise estimate
    pub annulus_half_width: f64,
    /// Radius blanked around each accepted candidate
    pub candidate_mask_radius: f64,
    /// Width of the excluded border, in pixels
    pub edge_margin: usize,
    /// Radius around the star that is never searched; defaults to the inner
    /// working angle when unset
    pub central_exclusion_radius: Option<f64>,
    /// Conversion from pixels to the reported angular separation
    pub pix2as: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            snr_threshold: 3.0,
            kernel_half_width: 10,
            pixel_mask_radius: 5.0,
            annulus_half_width: 2.0,
            candidate_mask_radius: 15.0,
            edge_margin: 10,
            central_exclusion_radius: None,
            pix2as: 1.0,
        }
    }
}

/// A peak in the signal-to-noise map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// 1-based rank in order of detection
    pub index: usize,
    pub snr: f64,
    pub position_angle_deg: f64,
    pub separation_px: f64,
    pub separation_as: f64,
    /// Column offset from the star
    pub x: f64,
    /// Row offset from the star
    pub y: f64,
    pub row: usize,
    pub col: usize,
}

/// Mean of each pixel across channels with equal weights, skipping NaNs.
pub fn collapse_flat_spectrum(cube: &ArrayView3<f64>) -> Array2<f64> {
    let (_, rows, cols) = cube.dim();
    let mut sum = Array2::<f64>::zeros((rows, cols));
    let mut count = Array2::<f64>::zeros((rows, cols));
    for channel in cube.axis_iter(Axis(0)) {
        for ((s, n), &v) in sum.iter_mut().zip(count.iter_mut()).zip(channel.iter()) {
            if v.is_finite() {
                *s += v;
                *n += 1.0;
            }
        }
    }
    sum.zip_mut_with(&count, |s, &n| {
        *s = if n > 0.0 { *s / n } else { f64::NAN };
    });
    sum
}

/// Matched-filter an image with a unit-peak Gaussian of the given FWHM.
pub fn cross_correlate(image: &ArrayView2<f64>, fwhm_px: f64, half_width: usize) -> Array2<f64> {
    let kernel = gaussian_kernel(half_width, fwhm_to_sigma(fwhm_px));
    convolve2d_same(image, &kernel.view())
}

/// Per-pixel signal-to-noise map.
///
/// Each finite pixel at radius `r` is compared against the finite pixels with
/// radius in `[r - dr, r + dr]` that lie farther than `mask_radius` from it:
/// `snr = (value - mean) / std`. Pixels with fewer than three reference pixels
/// or a zero spread are NaN.
pub fn snr_map(
    image: &ArrayView2<f64>,
    center: [f64; 2],
    mask_radius: f64,
    annulus_half_width: f64,
) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let radii = radius_map((rows, cols), center);

    // Finite pixels sorted by radius so each annulus is a contiguous slice.
    let mut samples: Vec<(f64, usize, usize, f64)> = image
        .indexed_iter()
        .filter(|(_, v)| v.is_finite())
        .map(|((row, col), &v)| (radii[[row, col]], row, col, v))
        .collect();
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mask_sq = mask_radius * mask_radius;
    let mut snr = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    for &(r, row, col, value) in &samples {
        let lo = samples.partition_point(|s| s.0 < r - annulus_half_width);
        // Accumulate offsets from the pixel's own value so a flat background
        // gives an exactly zero spread.
        let mut n = 0usize;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for &(r2, row2, col2, v2) in &samples[lo..] {
            if r2 > r + annulus_half_width {
                break;
            }
            let dr = row2 as f64 - row as f64;
            let dc = col2 as f64 - col as f64;
            if dr * dr + dc * dc <= mask_sq {
                continue;
            }
            let d = v2 - value;
            n += 1;
            sum += d;
            sum_sq += d * d;
        }
        if n < 3 {
            continue;
        }
        let mean_offset = sum / n as f64;
        let variance = (sum_sq / n as f64 - mean_offset * mean_offset).max(0.0);
        let std = variance.sqrt();
        if std > 0.0 {
            snr[[row, col]] = -mean_offset / std;
        }
    }
    snr
}

/// Greedy peak search on a signal-to-noise map.
///
/// Pixels within `edge_margin` of the border, within `edge_margin / 2` of any
/// non-finite pixel, or inside `central_exclusion` of the star are never
/// reported. The brightest remaining pixel is accepted while it reaches
/// `snr_threshold`, and a disk of `candidate_mask_radius` around it is removed
/// from further consideration.
pub fn point_source_detection(
    snr: &ArrayView2<f64>,
    center: [f64; 2],
    settings: &DetectionSettings,
    central_exclusion: f64,
) -> Vec<Candidate> {
    let (rows, cols) = snr.dim();
    let mut work = snr.to_owned();
    let edge = settings.edge_margin;
    let near = (edge / 2) as isize;

    for ((row, col), &v) in snr.indexed_iter() {
        if v.is_finite() {
            continue;
        }
        let r_lo = (row as isize - near).max(0) as usize;
        let r_hi = (row as isize + near).min(rows as isize - 1) as usize;
        let c_lo = (col as isize - near).max(0) as usize;
        let c_hi = (col as isize + near).min(cols as isize - 1) as usize;
        for r in r_lo..=r_hi {
            for c in c_lo..=c_hi {
                work[[r, c]] = f64::NAN;
            }
        }
    }

    for ((row, col), value) in work.indexed_iter_mut() {
        let at_edge = row < edge || col < edge || row + edge >= rows || col + edge >= cols;
        let radius = (col as f64 - center[0]).hypot(row as f64 - center[1]);
        if at_edge || radius < central_exclusion {
            *value = f64::NAN;
        }
    }

    let mask_sq = settings.candidate_mask_radius * settings.candidate_mask_radius;
    let mut candidates = Vec::new();
    loop {
        let mut best: Option<((usize, usize), f64)> = None;
        for (idx, &v) in work.indexed_iter() {
            if v.is_finite() && best.map_or(true, |(_, b)| v > b) {
                best = Some((idx, v));
            }
        }
        let Some(((row, col), value)) = best else { break };
        if value < settings.snr_threshold {
            break;
        }

        let x = col as f64 - center[0];
        let y = row as f64 - center[1];
        let separation_px = x.hypot(y);
        candidates.push(Candidate {
            index: candidates.len() + 1,
            snr: value,
            position_angle_deg: position_angle_deg(x, y),
            separation_px,
            separation_as: separation_px * settings.pix2as,
            x,
            y,
            row,
            col,
        });

        for ((r, c), v) in work.indexed_iter_mut() {
            let dr = r as f64 - row as f64;
            let dc = c as f64 - col as f64;
            if dr * dr + dc * dc <= mask_sq {
                *v = f64::NAN;
            }
        }
    }
    candidates
}

/// Run the full detection pipeline on a reduced cube.
///
/// Returns the candidates together with the signal-to-noise map so callers
/// can check it for degeneracy.
pub fn detect_candidates(
    cube: &ArrayView3<f64>,
    center: [f64; 2],
    fwhm_px: f64,
    inner_working_angle_px: f64,
    settings: &DetectionSettings,
) -> (Vec<Candidate>, Array2<f64>) {
    let collapsed = collapse_flat_spectrum(cube);
    let correlated = cross_correlate(&collapsed.view(), fwhm_px, settings.kernel_half_width);
    let snr = snr_map(
        &correlated.view(),
        center,
        settings.pixel_mask_radius,
        settings.annulus_half_width,
    );
    let exclusion = settings
        .central_exclusion_radius
        .unwrap_or(inner_working_angle_px);
    let candidates = point_source_detection(&snr.view(), center, settings, exclusion);
    (candidates, snr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use shared::image_proc::gaussian::add_gaussian;
    use shared::image_proc::noise::simple_normal_array;

    #[test]
    fn test_collapse_skips_nan() {
        let mut cube = Array3::<f64>::zeros((3, 2, 2));
        cube[[0, 0, 0]] = 3.0;
        cube[[1, 0, 0]] = f64::NAN;
        cube[[2, 0, 0]] = 1.0;
        for c in 0..3 {
            cube[[c, 1, 1]] = f64::NAN;
        }
        let collapsed = collapse_flat_spectrum(&cube.view());
        assert_relative_eq!(collapsed[[0, 0]], 2.0);
        assert!(collapsed[[1, 1]].is_nan());
    }

    #[test]
    fn test_snr_map_flags_outlier() {
        let mut image = simple_normal_array((61, 61), 0.0, 1.0, 7).unwrap();
        image[[30, 50]] = 25.0;
        let snr = snr_map(&image.view(), [30.0, 30.0], 3.0, 2.0);
        assert!(snr[[30, 50]] > 10.0);
        // Too few reference pixels right at the center.
        assert!(snr[[30, 30]].is_nan());
    }

    #[test]
    fn test_snr_map_constant_is_nan() {
        let image = Array2::<f64>::from_elem((31, 31), 4.0);
        let snr = snr_map(&image.view(), [15.0, 15.0], 2.0, 2.0);
        assert!(snr.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_detection_finds_injected_peak() {
        let mut image = simple_normal_array((101, 101), 0.0, 1e-3, 12345).unwrap();
        add_gaussian(&mut image.view_mut(), 30.0, 50.0, 5e-2, fwhm_to_sigma(6.0));
        let cube = image.insert_axis(Axis(0));

        let (candidates, _) =
            detect_candidates(&cube.view(), [50.0, 50.0], 6.0, 5.0, &DetectionSettings::default());
        let first = candidates.first().expect("at least one candidate");
        assert_eq!(first.index, 1);
        assert_eq!((first.row, first.col), (50, 30));
        assert_relative_eq!(first.x, -20.0);
        assert_relative_eq!(first.y, 0.0);
        assert_relative_eq!(first.position_angle_deg, 90.0);
        assert_relative_eq!(first.separation_px, 20.0);
        for pair in candidates.windows(2) {
            assert!(pair[0].snr >= pair[1].snr);
        }
    }

    #[test]
    fn test_exclusions() {
        let mut snr = Array2::<f64>::zeros((41, 41));
        snr[[3, 20]] = 50.0; // inside the edge margin
        snr[[20, 22]] = 40.0; // inside the central exclusion
        snr[[30, 30]] = 9.0;
        snr[[31, 31]] = 8.0; // masked by the first accepted candidate
        let settings = DetectionSettings {
            edge_margin: 5,
            ..Default::default()
        };
        let found = point_source_detection(&snr.view(), [20.0, 20.0], &settings, 5.0);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].row, found[0].col), (30, 30));
    }

    #[test]
    fn test_near_nan_excluded() {
        let mut snr = Array2::<f64>::zeros((30, 30));
        snr[[15, 15]] = f64::NAN;
        snr[[15, 18]] = 12.0;
        snr[[21, 21]] = 6.0;
        let settings = DetectionSettings {
            edge_margin: 8,
            candidate_mask_radius: 2.0,
            ..Default::default()
        };
        let found = point_source_detection(&snr.view(), [0.0, 0.0], &settings, 0.0);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].row, found[0].col), (21, 21));
    }
}
