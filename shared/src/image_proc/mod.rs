//! Image-processing building blocks: PSF stamps, filters, rotations and
//! NaN-aware statistics.

pub mod filter;
pub mod gaussian;
pub mod noise;
pub mod rotate;
pub mod stats;

pub use filter::{convolve2d_same, nan_gaussian_filter, FilterError};
pub use gaussian::{add_gaussian, fwhm_to_sigma, gaussian_kernel};
pub use rotate::rotate_about;
pub use stats::{nan_median, radius_map, SampleStats};
