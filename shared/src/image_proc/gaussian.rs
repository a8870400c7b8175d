//! Gaussian PSF stamps and kernels.
//!
//! The sweep models both injected companions and the matched filter used for
//! detection as circular Gaussians. Widths are usually quoted as a FWHM in
//! pixels, so conversion helpers live here alongside the stamp routines.

use ndarray::{Array2, ArrayViewMut2};
use std::f64::consts::LN_2;

/// Number of sigmas covered by a stamp before it is truncated.
pub const STAMP_HALF_WIDTH_SIGMAS: f64 = 4.0;

/// Convert a Gaussian full width at half maximum to its standard deviation.
pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / (2.0 * (2.0 * LN_2).sqrt())
}

/// Evaluate a unit-peak circular Gaussian at an offset from its center.
pub fn gaussian_value(dx: f64, dy: f64, sigma: f64) -> f64 {
    (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
}

/// Build a square, unit-peak Gaussian kernel of size `2 * half_width + 1`.
///
/// The kernel is centered on its middle pixel and is symmetric under
/// reflection in both axes.
pub fn gaussian_kernel(half_width: usize, sigma: f64) -> Array2<f64> {
    let size = 2 * half_width + 1;
    let center = half_width as f64;
    Array2::from_shape_fn((size, size), |(row, col)| {
        gaussian_value(col as f64 - center, row as f64 - center, sigma)
    })
}

/// Add a Gaussian of the given peak amplitude to an image.
///
/// The stamp is truncated at four sigma and clipped to the image bounds, so
/// sources partially (or entirely) off the edge are handled without panicking.
/// Values are accumulated, which lets several sources overlap.
///
/// # Arguments
/// * `image` - Image to modify, indexed `[row, col]`
/// * `center_x` - Column coordinate of the peak
/// * `center_y` - Row coordinate of the peak
/// * `amplitude` - Peak value of the Gaussian
/// * `sigma` - Standard deviation in pixels
pub fn add_gaussian(
    image: &mut ArrayViewMut2<f64>,
    center_x: f64,
    center_y: f64,
    amplitude: f64,
    sigma: f64,
) {
    let (height, width) = image.dim();
    if height == 0 || width == 0 || sigma <= 0.0 {
        return;
    }

    let reach = STAMP_HALF_WIDTH_SIGMAS * sigma;
    let x_lo = (center_x - reach).ceil().max(0.0);
    let x_hi = (center_x + reach).floor().min(width as f64 - 1.0);
    let y_lo = (center_y - reach).ceil().max(0.0);
    let y_hi = (center_y + reach).floor().min(height as f64 - 1.0);
    if x_lo > x_hi || y_lo > y_hi {
        return;
    }

    for y in y_lo as usize..=y_hi as usize {
        for x in x_lo as usize..=x_hi as usize {
            let dx = x as f64 - center_x;
            let dy = y as f64 - center_y;
            image[[y, x]] += amplitude * gaussian_value(dx, dy, sigma);
        }
    }
}
