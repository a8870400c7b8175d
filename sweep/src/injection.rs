//! Synthetic companion injection and flux retrieval.
//!
//! Positions use the on-sky convention with north along +y and east along -x:
//! a source at separation `sep` and position angle `pa` (degrees east of
//! north) sits at `x = cx - sep * sin(pa)`, `y = cy + sep * cos(pa)`.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use shared::image_proc::gaussian::{add_gaussian, fwhm_to_sigma, gaussian_value};
use thiserror::Error;

use crate::cube::DataCube;
use crate::instrument::SpectralCalibration;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InjectionError {
    #[error("{fluxes} injection fluxes but {seps} injection separations; the lists are paired")]
    MismatchedAxes { fluxes: usize, seps: usize },

    #[error("Injection list '{0}' is empty")]
    EmptyAxis(&'static str),

    #[error("Injection FWHM must be positive and finite, got {0}")]
    InvalidFwhm(f64),

    #[error("Injection {what} must be finite and positive, got {value}")]
    InvalidValue { what: &'static str, value: f64 },

    #[error("Cube has {cube} channels but calibration covers {calibration}")]
    ChannelMismatch { cube: usize, calibration: usize },
}

/// Pixel offset `(dx, dy)` from the star for a separation and position angle.
pub fn sky_offset(separation_px: f64, position_angle_deg: f64) -> (f64, f64) {
    let (sin_pa, cos_pa) = position_angle_deg.to_radians().sin_cos();
    (-separation_px * sin_pa, separation_px * cos_pa)
}

/// Position angle in degrees, in `[0, 360)`, of an offset from the star.
pub fn position_angle_deg(dx: f64, dy: f64) -> f64 {
    (-dx).atan2(dy).to_degrees().rem_euclid(360.0)
}

/// One synthetic companion in the population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InjectedSource {
    /// Contrast relative to the star
    pub flux: f64,
    pub separation_px: f64,
    pub position_angle_deg: f64,
}

/// The injected population: each (flux, separation) pair placed at every
/// position angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionPlan {
    fluxes: Vec<f64>,
    separations_px: Vec<f64>,
    position_angles_deg: Vec<f64>,
    fwhm_px: f64,
}

impl InjectionPlan {
    pub fn new(
        fluxes: Vec<f64>,
        separations_px: Vec<f64>,
        position_angles_deg: Vec<f64>,
        fwhm_px: f64,
    ) -> Result<Self, InjectionError> {
        if fluxes.is_empty() {
            return Err(InjectionError::EmptyAxis("fake_fluxes"));
        }
        if separations_px.is_empty() {
            return Err(InjectionError::EmptyAxis("fake_seps"));
        }
        if position_angles_deg.is_empty() {
            return Err(InjectionError::EmptyAxis("fake_pas"));
        }
        if fluxes.len() != separations_px.len() {
            return Err(InjectionError::MismatchedAxes {
                fluxes: fluxes.len(),
                seps: separations_px.len(),
            });
        }
        if !(fwhm_px.is_finite() && fwhm_px > 0.0) {
            return Err(InjectionError::InvalidFwhm(fwhm_px));
        }
        for (what, values) in [("flux", &fluxes), ("separation", &separations_px)] {
            if let Some(&value) = values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
                return Err(InjectionError::InvalidValue { what, value });
            }
        }
        if let Some(&value) = position_angles_deg.iter().find(|v| !v.is_finite()) {
            return Err(InjectionError::InvalidValue {
                what: "position angle",
                value,
            });
        }

        Ok(Self {
            fluxes,
            separations_px,
            position_angles_deg,
            fwhm_px,
        })
    }

    pub fn fluxes(&self) -> &[f64] {
        &self.fluxes
    }

    pub fn separations_px(&self) -> &[f64] {
        &self.separations_px
    }

    pub fn position_angles_deg(&self) -> &[f64] {
        &self.position_angles_deg
    }

    pub fn fwhm_px(&self) -> f64 {
        self.fwhm_px
    }

    /// Number of injected sources
    pub fn len(&self) -> usize {
        self.fluxes.len() * self.position_angles_deg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every injected source, separation-major then position angle.
    pub fn sources(&self) -> impl Iterator<Item = InjectedSource> + '_ {
        self.fluxes
            .iter()
            .zip(&self.separations_px)
            .flat_map(move |(&flux, &separation_px)| {
                self.position_angles_deg
                    .iter()
                    .map(move |&position_angle_deg| InjectedSource {
                        flux,
                        separation_px,
                        position_angle_deg,
                    })
            })
    }
}

/// Add every source of the plan to every frame of a cube, in place.
///
/// Fluxes are contrasts, so each frame receives `flux / ratio[channel]` to
/// express the source in the cube's raw stellar units. The position angle in
/// each frame is offset by that frame's sky rotation. Calling this twice
/// injects the population twice.
pub fn inject_sources(
    cube: &mut DataCube,
    plan: &InjectionPlan,
    calibration: &SpectralCalibration,
) -> Result<(), InjectionError> {
    if calibration.len() != cube.n_channels() {
        return Err(InjectionError::ChannelMismatch {
            cube: cube.n_channels(),
            calibration: calibration.len(),
        });
    }

    let sigma = fwhm_to_sigma(plan.fwhm_px());
    for source in plan.sources() {
        for frame_idx in 0..cube.n_frames() {
            let center = cube.center(frame_idx);
            let amplitude = source.flux / calibration.flux_ratio[cube.channel(frame_idx)];
            let (dx, dy) = sky_offset(
                source.separation_px,
                source.position_angle_deg + cube.rotation_deg(frame_idx),
            );
            add_gaussian(
                &mut cube.frame_mut(frame_idx),
                center[0] + dx,
                center[1] + dy,
                amplitude,
                sigma,
            );
        }
    }
    Ok(())
}

/// Recover the flux of a source at a known position.
///
/// Fits `amplitude * g + background` by linear least squares over the finite
/// pixels within `search_radius` of the expected position, where `g` is a
/// unit-peak Gaussian of the given FWHM. Returns NaN when the fit is
/// underdetermined.
pub fn retrieve_flux(
    frame: &ArrayView2<f64>,
    center: [f64; 2],
    separation_px: f64,
    position_angle_deg: f64,
    fwhm_px: f64,
    search_radius: f64,
) -> f64 {
    let (rows, cols) = frame.dim();
    let (dx, dy) = sky_offset(separation_px, position_angle_deg);
    let x0 = center[0] + dx;
    let y0 = center[1] + dy;
    let sigma = fwhm_to_sigma(fwhm_px);

    let col_lo = (x0 - search_radius).ceil().max(0.0) as usize;
    let col_hi = (x0 + search_radius).floor().min(cols as f64 - 1.0);
    let row_lo = (y0 - search_radius).ceil().max(0.0) as usize;
    let row_hi = (y0 + search_radius).floor().min(rows as f64 - 1.0);
    if col_hi < 0.0 || row_hi < 0.0 {
        return f64::NAN;
    }

    let (mut n, mut sg, mut sgg, mut sd, mut sgd) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for row in row_lo..=row_hi as usize {
        for col in col_lo..=col_hi as usize {
            let ox = col as f64 - x0;
            let oy = row as f64 - y0;
            if ox.hypot(oy) > search_radius {
                continue;
            }
            let value = frame[[row, col]];
            if !value.is_finite() {
                continue;
            }
            let g = gaussian_value(ox, oy, sigma);
            n += 1.0;
            sg += g;
            sgg += g * g;
            sd += value;
            sgd += g * value;
        }
    }

    let det = n * sgg - sg * sg;
    if n < 3.0 || det.abs() <= f64::EPSILON * n * sgg {
        return f64::NAN;
    }
    (n * sgd - sg * sd) / det
}
