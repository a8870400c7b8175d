//! Image rotation about an arbitrary center.

use ndarray::{Array2, ArrayView2};

/// Bilinear sample at fractional `(x, y)`; NaN outside the image.
pub fn bilinear_sample(image: &ArrayView2<f64>, x: f64, y: f64) -> f64 {
    let (rows, cols) = image.dim();
    if !(x >= 0.0 && y >= 0.0 && x <= (cols - 1) as f64 && y <= (rows - 1) as f64) {
        return f64::NAN;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(cols - 1);
    let y1 = (y0 + 1).min(rows - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let top = image[[y0, x0]] * (1.0 - fx) + image[[y0, x1]] * fx;
    let bottom = image[[y1, x0]] * (1.0 - fx) + image[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Rotate an image counterclockwise by `angle_deg` about `center` (`[x, y]`).
///
/// Counterclockwise is measured with x increasing along columns and y
/// increasing along rows. A feature at position angle `theta` (east of
/// north, with north along +y and east along -x) ends up at `theta + angle_deg`.
/// Pixels whose source falls outside the input are NaN.
pub fn rotate_about(image: &ArrayView2<f64>, center: [f64; 2], angle_deg: f64) -> Array2<f64> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return image.to_owned();
    }
    let (sin_a, cos_a) = angle_deg.to_radians().sin_cos();
    Array2::from_shape_fn((rows, cols), |(row, col)| {
        let dx = col as f64 - center[0];
        let dy = row as f64 - center[1];
        let src_x = center[0] + dx * cos_a + dy * sin_a;
        let src_y = center[1] - dx * sin_a + dy * cos_a;
        bilinear_sample(image, src_x, src_y)
    })
}
