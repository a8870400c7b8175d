//! Image-processing primitives shared by the sweep crate.
//!
//! Everything here operates on `ndarray` images indexed `[row, col]`, where
//! the column index is the x coordinate and the row index is the y coordinate.
//! NaN marks pixels with no valid data and is propagated or skipped explicitly
//! by each routine.

pub mod image_proc;
