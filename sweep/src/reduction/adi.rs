//! Classical angular differential imaging.
//!
//! A baseline reducer used when no external post-processing package is
//! wired in: optional highpass filtering, subtraction of the per-channel
//! median frame, derotation to north-up and a NaN-aware mean. It ignores the
//! annuli, subsections, movement, template and smoothing parameters and writes
//! the same cube for every requested basis count.

use log::debug;
use ndarray::{Array2, Array3, Axis};
use shared::image_proc::filter::highpass_filter;
use shared::image_proc::{nan_median, rotate_about};

use super::{ReductionError, ReductionJob, ReductionMode, Reducer};
use crate::cube::{io::write_reduced_cube, DataCube, ReducedCube};

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicalAdi;

impl ClassicalAdi {
    /// Reduce every channel of a cube without writing anything.
    pub fn reduce_cube(
        &self,
        cube: &DataCube,
        highpass_sigma_px: Option<f64>,
    ) -> Result<ReducedCube, ReductionError> {
        let (rows, cols) = cube.frame_shape();
        let mut reduced = Array3::<f64>::from_elem((cube.n_channels(), rows, cols), f64::NAN);

        for channel in 0..cube.n_channels() {
            let indices = cube.frames_for_channel(channel);
            if indices.is_empty() {
                return Err(ReductionError::Failed(format!(
                    "channel {channel} has no frames"
                )));
            }

            let frames = indices
                .iter()
                .map(|&i| match highpass_sigma_px {
                    Some(sigma) => highpass_filter(&cube.frame(i), sigma),
                    None => Ok(cube.frame(i).to_owned()),
                })
                .collect::<Result<Vec<Array2<f64>>, _>>()?;

            let reference = Array2::from_shape_fn((rows, cols), |(r, c)| {
                nan_median(frames.iter().map(|f| f[[r, c]])).unwrap_or(f64::NAN)
            });

            let mut sum = Array2::<f64>::zeros((rows, cols));
            let mut count = Array2::<f64>::zeros((rows, cols));
            for (frame, &i) in frames.iter().zip(&indices) {
                let residual = frame - &reference;
                let derotated = rotate_about(&residual.view(), cube.center(i), -cube.rotation_deg(i));
                for ((s, n), &v) in sum.iter_mut().zip(count.iter_mut()).zip(derotated.iter()) {
                    if v.is_finite() {
                        *s += v;
                        *n += 1.0;
                    }
                }
            }

            let mut out = reduced.index_axis_mut(Axis(0), channel);
            for ((o, &s), &n) in out.iter_mut().zip(sum.iter()).zip(count.iter()) {
                if n > 0.0 {
                    *o = s / n;
                }
            }
        }

        Ok(ReducedCube {
            header: cube.header().clone(),
            data: reduced,
        })
    }
}

impl Reducer for ClassicalAdi {
    fn name(&self) -> &str {
        "classical-adi"
    }

    fn reduce(&self, cube: &DataCube, job: &ReductionJob<'_>) -> Result<(), ReductionError> {
        if job.mode != ReductionMode::Adi {
            debug!(
                "{} performs angular differencing only; requested mode {} is recorded but not applied",
                self.name(),
                job.mode
            );
        }
        let reduced = self.reduce_cube(cube, job.highpass_sigma_px)?;
        for &numbasis in job.numbasis {
            write_reduced_cube(&job.output_path(numbasis), &reduced, job.format)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{io::read_reduced_cube, CubeFormat, CubeHeader, Exposure};
    use crate::params::{Highpass, ParameterSet};
    use approx::assert_relative_eq;
    use shared::image_proc::gaussian::add_gaussian;
    use tempfile::TempDir;

    fn rotating_sequence() -> DataCube {
        let header = CubeHeader {
            filter_name: "H".to_string(),
            lam_min_nm: 1550.0,
            dloglam: 0.0,
            psf_center: [30.0, 30.0],
        };
        // A static speckle plus a companion that rotates with the sky.
        let exposures = [-40.0, -20.0, 0.0, 20.0, 40.0]
            .into_iter()
            .map(|angle: f64| {
                let mut data = Array3::<f64>::zeros((1, 61, 61));
                let mut frame = data.index_axis_mut(Axis(0), 0);
                add_gaussian(&mut frame, 40.0, 30.0, 5.0, 1.5);
                let (s, c) = angle.to_radians().sin_cos();
                // Sky PA 0 at separation 15 appears rotated by `angle`.
                add_gaussian(&mut frame, 30.0 - 15.0 * s, 30.0 + 15.0 * c, 1.0, 1.5);
                Exposure {
                    header: header.clone(),
                    parallactic_angle_deg: angle,
                    data,
                }
            })
            .collect();
        DataCube::from_exposures(exposures).unwrap()
    }

    #[test]
    fn test_static_speckle_removed_and_companion_kept() {
        let cube = rotating_sequence();
        let reduced = ClassicalAdi.reduce_cube(&cube, None).unwrap();
        let image = reduced.channel(0).unwrap();

        // Companion derotated to PA 0: north of the star.
        assert!(image[[45, 30]] > 0.5, "companion {}", image[[45, 30]]);
        // The speckle is identical in all frames and subtracts away.
        assert!(image[[30, 40]].abs() < 0.2, "speckle {}", image[[30, 40]]);
    }

    #[test]
    fn test_reduce_writes_every_basis_count() {
        let dir = TempDir::new().unwrap();
        let cube = rotating_sequence();
        let params = ParameterSet {
            annuli: 1,
            subsections: 1,
            movement: 1.0,
            spectrum: None,
            corr_smooth: 1.0,
            highpass: Highpass::Enabled(false),
        };
        let job = ReductionJob {
            output_dir: dir.path(),
            file_prefix: format!("T_withfakes_{}", params.identifier()),
            params: &params,
            numbasis: &[1, 5],
            highpass_sigma_px: params.highpass.pixel_sigma(61),
            mode: ReductionMode::Adi,
            format: CubeFormat::Json,
        };
        ClassicalAdi.reduce(&cube, &job).unwrap();

        let one = read_reduced_cube(&job.output_path(1)).unwrap();
        let five = read_reduced_cube(&job.output_path(5)).unwrap();
        assert_eq!(one, five);
        assert_eq!(one.header, *cube.header());
        assert_relative_eq!(one.center()[0], 30.0);
    }

    #[test]
    fn test_unusable_highpass_sigma_fails_reduction() {
        let cube = rotating_sequence();
        for sigma in [Highpass::Cutoff(-5.0).pixel_sigma(61), Some(f64::INFINITY)] {
            let err = ClassicalAdi.reduce_cube(&cube, sigma).unwrap_err();
            assert!(matches!(err, ReductionError::Filter(_)), "{err}");
        }
    }
}
