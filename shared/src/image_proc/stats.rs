//! NaN-aware summary statistics over pixel samples.

use ndarray::Array2;

/// Mean and spread of the finite values in a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    /// Number of finite values
    pub count: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Sum of squared deviations from the mean
    sum_sq_dev: f64,
}

impl SampleStats {
    /// Compute statistics over the finite values of `values`.
    ///
    /// Returns `None` when no finite value is present.
    pub fn from_values<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        // Welford's update keeps the variance stable for large samples.
        let mut count = 0usize;
        let mut mean = 0.0;
        let mut sum_sq_dev = 0.0;
        for value in values.into_iter().filter(|v| v.is_finite()) {
            count += 1;
            let delta = value - mean;
            mean += delta / count as f64;
            sum_sq_dev += delta * (value - mean);
        }
        (count > 0).then_some(Self {
            count,
            mean,
            sum_sq_dev,
        })
    }

    /// Standard deviation with `ddof` delta degrees of freedom.
    ///
    /// NaN when `count <= ddof`.
    pub fn std(&self, ddof: usize) -> f64 {
        if self.count <= ddof {
            return f64::NAN;
        }
        (self.sum_sq_dev / (self.count - ddof) as f64).sqrt()
    }
}

/// Median of the finite values, or `None` if there are none.
pub fn nan_median<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(f64::total_cmp);
    let mid = finite.len() / 2;
    Some(if finite.len() % 2 == 0 {
        0.5 * (finite[mid - 1] + finite[mid])
    } else {
        finite[mid]
    })
}

/// Distance of every pixel from `center`, given as `[x, y]`.
pub fn radius_map(shape: (usize, usize), center: [f64; 2]) -> Array2<f64> {
    Array2::from_shape_fn(shape, |(row, col)| {
        (col as f64 - center[0]).hypot(row as f64 - center[1])
    })
}
