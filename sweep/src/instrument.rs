//! Instrument description: aperture geometry and spectral flux calibration.
//!
//! The defaults describe the CHARIS integral field spectrograph behind an
//! 8 m telescope. Geometry is derived from the diffraction limit at the
//! filter's central wavelength; the flux calibration converts each channel
//! from stellar units into companion-to-star contrast using the satellite-spot
//! brightness law.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::cube::CubeHeader;

/// Arcseconds per radian
pub const ARCSEC_PER_RADIAN: f64 = 206265.0;

/// Factor relating the diffraction FWHM to lambda/D used throughout the sweep.
const FWHM_LAMBDA_OVER_D: f64 = 2.0 * 1.22;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstrumentError {
    #[error("Unsupported filter '{name}' (known filters: {known})")]
    UnsupportedFilter { name: String, known: String },
}

/// Static properties of the instrument used to scale the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Telescope primary diameter in meters
    pub telescope_diameter_m: f64,
    /// Plate scale in arcseconds per pixel
    pub plate_scale_arcsec_per_px: f64,
    /// Radius of the usable field in arcseconds
    pub field_radius_arcsec: f64,
    /// Inner working angle in pixels
    pub inner_working_angle_px: f64,
    /// Central wavelength of each filter in meters, keyed by lowercase name
    pub filter_wavelengths_m: BTreeMap<String, f64>,
    /// Satellite spot to star flux ratio at the reference wavelength
    pub spot_to_star_ratio: f64,
    /// Reference wavelength of the spot ratio in microns
    pub reference_wavelength_um: f64,
    /// Power-law index of the spot ratio with wavelength
    pub spot_power_law_index: f64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self::charis()
    }
}

impl InstrumentConfig {
    /// CHARIS on Subaru
    pub fn charis() -> Self {
        let filter_wavelengths_m = [
            ("j", 1200e-9),
            ("h", 1550e-9),
            ("k", 2346e-9),
            ("broadband", 1550e-9),
        ]
        .into_iter()
        .map(|(name, wl)| (name.to_string(), wl))
        .collect();

        Self {
            telescope_diameter_m: 8.0,
            plate_scale_arcsec_per_px: 0.0162,
            field_radius_arcsec: 1.035,
            inner_working_angle_px: 5.0,
            filter_wavelengths_m,
            spot_to_star_ratio: 2.72e-3,
            reference_wavelength_um: 1.55,
            spot_power_law_index: -2.0,
        }
    }

    /// Central wavelength of a filter, matched case-insensitively.
    pub fn filter_wavelength_m(&self, filter_name: &str) -> Result<f64, InstrumentError> {
        self.filter_wavelengths_m
            .get(&filter_name.trim().to_ascii_lowercase())
            .copied()
            .ok_or_else(|| InstrumentError::UnsupportedFilter {
                name: filter_name.to_string(),
                known: self
                    .filter_wavelengths_m
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// FWHM, inner and outer working angle in pixels for a filter.
    pub fn aperture_geometry(&self, filter_name: &str) -> Result<ApertureGeometry, InstrumentError> {
        let wavelength_m = self.filter_wavelength_m(filter_name)?;
        let fwhm_px = FWHM_LAMBDA_OVER_D * wavelength_m / self.telescope_diameter_m
            * ARCSEC_PER_RADIAN
            / self.plate_scale_arcsec_per_px;
        let field_radius_px = self.field_radius_arcsec / self.plate_scale_arcsec_per_px;

        Ok(ApertureGeometry {
            fwhm_px,
            inner_working_angle_px: self.inner_working_angle_px,
            outer_working_angle_px: field_radius_px - fwhm_px,
        })
    }

    /// Per-channel wavelengths and spot-based flux ratios for a cube.
    pub fn spectral_calibration(&self, header: &CubeHeader, n_channels: usize) -> SpectralCalibration {
        let wavelengths_um: Vec<f64> = (0..n_channels)
            .map(|i| header.lam_min_nm * (header.dloglam * i as f64).exp() * 1e-3)
            .collect();
        let flux_ratio = wavelengths_um
            .iter()
            .map(|&wl| {
                self.spot_to_star_ratio
                    * (wl / self.reference_wavelength_um).powf(self.spot_power_law_index)
            })
            .collect();

        SpectralCalibration {
            wavelengths_um,
            flux_ratio,
        }
    }
}

/// Angular scales of the point-spread function and usable field, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApertureGeometry {
    pub fwhm_px: f64,
    pub inner_working_angle_px: f64,
    pub outer_working_angle_px: f64,
}

/// Wavelength and flux-ratio for every channel of a cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralCalibration {
    pub wavelengths_um: Vec<f64>,
    pub flux_ratio: Vec<f64>,
}

impl SpectralCalibration {
    pub fn len(&self) -> usize {
        self.wavelengths_um.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths_um.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_broadband_geometry() {
        let geometry = InstrumentConfig::charis()
            .aperture_geometry("broadband")
            .unwrap();
        assert_abs_diff_eq!(geometry.fwhm_px, 6.0192456, epsilon = 1e-6);
        assert_abs_diff_eq!(geometry.inner_working_angle_px, 5.0);
        assert_abs_diff_eq!(geometry.outer_working_angle_px, 57.869643, epsilon = 1e-5);
    }

    #[test]
    fn test_filter_lookup_is_case_insensitive() {
        let charis = InstrumentConfig::charis();
        let h = charis.aperture_geometry("H").unwrap();
        let bb = charis.aperture_geometry("Broadband").unwrap();
        assert_eq!(h, bb);
        let k = charis.aperture_geometry("k").unwrap();
        assert!(k.fwhm_px > h.fwhm_px);
    }

    #[test]
    fn test_unknown_filter_rejected() {
        let err = InstrumentConfig::charis().aperture_geometry("Z").unwrap_err();
        assert!(matches!(err, InstrumentError::UnsupportedFilter { ref name, .. } if name == "Z"));
        assert!(err.to_string().contains("broadband"));
    }

    #[test]
    fn test_spectral_calibration_reference_values() {
        let header = CubeHeader {
            filter_name: "broadband".to_string(),
            lam_min_nm: 1159.56144,
            dloglam: (1.19969705_f64 / 1.15956144).ln(),
            psf_center: [100.0, 100.0],
        };
        let cal = InstrumentConfig::charis().spectral_calibration(&header, 22);
        assert_eq!(cal.len(), 22);
        assert_abs_diff_eq!(cal.wavelengths_um[0], 1.15956144, epsilon = 1e-8);
        assert_abs_diff_eq!(cal.wavelengths_um[1], 1.19969705, epsilon = 1e-8);
        assert_abs_diff_eq!(cal.wavelengths_um[21], 2.36934405, epsilon = 1e-5);
        assert_abs_diff_eq!(cal.flux_ratio[0], 0.0048601, epsilon = 1e-6);
        for (&wl, &ratio) in cal.wavelengths_um.iter().zip(&cal.flux_ratio) {
            assert_abs_diff_eq!(ratio, 2.72e-3 * (wl / 1.55).powi(-2), epsilon = 1e-15);
        }
    }

    #[test]
    fn test_reference_wavelength_gives_spot_ratio() {
        let header = CubeHeader {
            filter_name: "H".to_string(),
            lam_min_nm: 1550.0,
            dloglam: 0.0,
            psf_center: [0.0, 0.0],
        };
        let cal = InstrumentConfig::charis().spectral_calibration(&header, 1);
        assert_abs_diff_eq!(cal.flux_ratio[0], 2.72e-3, epsilon = 1e-15);
    }
}
