//! NaN-aware convolution and smoothing filters.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use thiserror::Error;

use super::gaussian::STAMP_HALF_WIDTH_SIGMAS;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("Gaussian sigma must be finite and positive, got {0}")]
    InvalidSigma(f64),
}

/// Convolve an image with a kernel, returning an image of the same shape.
///
/// Pixels outside the image and NaN pixels contribute zero. Pixels that were
/// NaN on input are NaN on output, so masked regions survive filtering.
pub fn convolve2d_same(image: &ArrayView2<f64>, kernel: &ArrayView2<f64>) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let (k_rows, k_cols) = kernel.dim();
    let half_r = (k_rows / 2) as isize;
    let half_c = (k_cols / 2) as isize;

    let mut output = Array2::<f64>::zeros((rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            if !image[[row, col]].is_finite() {
                output[[row, col]] = f64::NAN;
                continue;
            }
            let mut acc = 0.0;
            for kr in 0..k_rows {
                let src_r = row as isize + half_r - kr as isize;
                if src_r < 0 || src_r >= rows as isize {
                    continue;
                }
                for kc in 0..k_cols {
                    let src_c = col as isize + half_c - kc as isize;
                    if src_c < 0 || src_c >= cols as isize {
                        continue;
                    }
                    let value = image[[src_r as usize, src_c as usize]];
                    if value.is_finite() {
                        acc += value * kernel[[kr, kc]];
                    }
                }
            }
            output[[row, col]] = acc;
        }
    }
    output
}

/// Sampled, unit-sum Gaussian.
/// The half width is at most `max_half`.
fn normalized_kernel_1d(sigma: f64, max_half: usize) -> Result<Array1<f64>, FilterError> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(FilterError::InvalidSigma(sigma));
    }
    let half = ((STAMP_HALF_WIDTH_SIGMAS * sigma).ceil().max(1.0) as usize).min(max_half.max(1));
    let kernel = Array1::from_shape_fn(2 * half + 1, |i| {
        let d = i as f64 - half as f64;
        (-(d * d) / (2.0 * sigma * sigma)).exp()
    });
    let total = kernel.sum();
    Ok(kernel / total)
}

/// One separable pass along `axis`, renormalizing by the weight of finite
/// neighbours so NaNs and image edges do not bias the result toward zero.
fn smooth_along(image: &Array2<f64>, kernel: &Array1<f64>, axis: Axis) -> Array2<f64> {
    let half = (kernel.len() / 2) as isize;
    let mut output = image.clone();
    for (mut out_lane, in_lane) in output
        .lanes_mut(axis)
        .into_iter()
        .zip(image.lanes(axis))
    {
        let n = in_lane.len() as isize;
        for i in 0..n {
            if !in_lane[i as usize].is_finite() {
                continue;
            }
            let mut acc = 0.0;
            let mut weight = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let j = i + k as isize - half;
                if j < 0 || j >= n {
                    continue;
                }
                let value = in_lane[j as usize];
                if value.is_finite() {
                    acc += value * w;
                    weight += w;
                }
            }
            out_lane[i as usize] = if weight > 0.0 { acc / weight } else { f64::NAN };
        }
    }
    output
}

/// Gaussian smoothing that ignores NaN pixels.
///
/// Each output pixel is the weighted mean of its finite neighbours. NaN input
/// pixels stay NaN. A non-positive sigma returns the image unchanged.
pub fn nan_gaussian_filter(image: &ArrayView2<f64>, sigma: f64) -> Result<Array2<f64>, FilterError> {
    let (rows, cols) = image.dim();
    let kernel = normalized_kernel_1d(sigma, rows.max(cols))?;
    let rows_done = smooth_along(&image.to_owned(), &kernel, Axis(0));
    Ok(smooth_along(&rows_done, &kernel, Axis(1)))
}

/// Subtract a Gaussian-smoothed copy of the image, keeping high spatial
/// frequencies only.
pub fn highpass_filter(image: &ArrayView2<f64>, sigma: f64) -> Result<Array2<f64>, FilterError> {
    let smooth = nan_gaussian_filter(image, sigma)?;
    Ok(image.to_owned() - smooth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::gaussian::gaussian_kernel;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_convolve_delta_reproduces_kernel() {
        let mut image = Array2::<f64>::zeros((9, 9));
        image[[4, 4]] = 1.0;
        let kernel = gaussian_kernel(2, 1.0);
        let out = convolve2d_same(&image.view(), &kernel.view());
        for r in 0..5 {
            for c in 0..5 {
                assert_relative_eq!(out[[r + 2, c + 2]], kernel[[r, c]], epsilon = 1e-12);
            }
        }
        assert_eq!(out[[0, 0]], 0.0);
    }

    #[test]
    fn test_convolve_preserves_nan_mask() {
        let image = array![[1.0, f64::NAN, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]];
        let kernel = array![[0.0, 0.0, 0.0], [0.0, 1.0, 1.0], [0.0, 0.0, 0.0]];
        let out = convolve2d_same(&image.view(), &kernel.view());
        assert!(out[[0, 1]].is_nan());
        // The NaN neighbour contributes zero instead of poisoning the sum.
        assert_relative_eq!(out[[0, 2]], 1.0);
        assert_relative_eq!(out[[1, 1]], 2.0);
    }

    #[test]
    fn test_gaussian_filter_preserves_constant() {
        let mut image = Array2::<f64>::from_elem((15, 15), 3.0);
        image[[7, 7]] = f64::NAN;
        let out = nan_gaussian_filter(&image.view(), 2.0).unwrap();
        assert!(out[[7, 7]].is_nan());
        for (&v, &orig) in out.iter().zip(image.iter()) {
            if orig.is_finite() {
                assert_relative_eq!(v, 3.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_highpass_removes_constant() {
        let image = Array2::<f64>::from_elem((11, 11), 7.5);
        let out = highpass_filter(&image.view(), 1.5).unwrap();
        assert!(out.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_invalid_sigma_is_rejected() {
        let image = array![[1.0, 2.0], [3.0, 4.0]];
        for sigma in [0.0, -1.5, f64::INFINITY] {
            assert_eq!(
                nan_gaussian_filter(&image.view(), sigma),
                Err(FilterError::InvalidSigma(sigma))
            );
            assert!(highpass_filter(&image.view(), sigma).is_err());
        }
        assert!(matches!(
            nan_gaussian_filter(&image.view(), f64::NAN),
            Err(FilterError::InvalidSigma(s)) if s.is_nan()
        ));
    }

    #[test]
    fn test_huge_sigma_flattens_to_mean() {
        let image = array![[1.0, 2.0], [3.0, 4.0]];
        let out = nan_gaussian_filter(&image.view(), 1e300).unwrap();
        for &v in out.iter() {
            assert_relative_eq!(v, 2.5, epsilon = 1e-12);
        }
    }
}
