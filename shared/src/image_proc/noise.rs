//! Seeded noise fields for building reproducible synthetic frames.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, NormalError};

/// Generate a 2D array of normally distributed values.
///
/// The same `seed` always produces the same field, which keeps synthetic
/// test cubes byte-identical between runs.
///
/// # Arguments
/// * `size` - Tuple of (height, width) for the output array dimensions
/// * `mean` - Mean value of the normal distribution
/// * `std_dev` - Standard deviation of the normal distribution
/// * `seed` - Random seed for deterministic output
///
/// # Example
/// ```
/// use shared::image_proc::noise::simple_normal_array;
///
/// let noise = simple_normal_array((10, 10), 100.0, 10.0, 42).unwrap();
/// assert_eq!(noise.dim(), (10, 10));
/// ```
pub fn simple_normal_array(
    size: (usize, usize),
    mean: f64,
    std_dev: f64,
    seed: u64,
) -> Result<Array2<f64>, NormalError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal_dist = Normal::new(mean, std_dev)?;
    Ok(Array2::from_shape_fn(size, |_| normal_dist.sample(&mut rng)))
}
