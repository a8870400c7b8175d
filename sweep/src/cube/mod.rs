//! In-memory spectral cubes: raw exposures, the stacked input sequence and
//! reduced (post-processed) cubes.
//!
//! Images are stored `[channel, row, col]` with the column index as x and the
//! row index as y. Sky position angles are measured from +y toward -x.

pub mod io;

#[cfg(feature = "fits")]
mod fits;

use ndarray::{Array3, ArrayView2, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use io::CubeFormat;

/// Errors raised while loading, assembling or writing cubes.
#[derive(Error, Debug)]
pub enum CubeIoError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed cube file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[cfg(feature = "fits")]
    #[error("FITS I/O error: {0}")]
    Fits(#[from] fitsio::compat::errors::Error),

    #[error("Unrecognized cube file extension: {0}")]
    UnknownExtension(PathBuf),

    #[error("{0} cubes require building with the '{1}' feature")]
    FormatUnavailable(&'static str, &'static str),

    #[error("Invalid cube data in {path}: {reason}")]
    InvalidData { path: PathBuf, reason: String },

    #[error("No exposures supplied")]
    Empty,

    #[error("Exposure {index} is inconsistent with the first exposure: {reason}")]
    InconsistentExposures { index: usize, reason: String },
}

/// Metadata carried by every exposure and reduced cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeHeader {
    /// Filter name, e.g. "broadband", "J", "H" or "K"
    pub filter_name: String,
    /// Wavelength of the first channel in nanometers
    pub lam_min_nm: f64,
    /// Natural-log wavelength step between adjacent channels
    pub dloglam: f64,
    /// Star position `[x, y]` in pixels
    pub psf_center: [f64; 2],
}

/// A single spectral exposure as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    pub header: CubeHeader,
    /// Sky rotation of this exposure: a source at sky position angle `theta`
    /// appears at `theta + parallactic_angle_deg` in the raw frame.
    pub parallactic_angle_deg: f64,
    /// Spectral cube `[channel, row, col]`
    pub data: Array3<f64>,
}

/// The full input sequence: every channel of every exposure, flattened into
/// one frame stack with per-frame geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct DataCube {
    frames: Array3<f64>,
    centers: Vec<[f64; 2]>,
    rotations_deg: Vec<f64>,
    channels: Vec<usize>,
    n_channels: usize,
    header: CubeHeader,
}

impl DataCube {
    /// Stack exposures into a single frame sequence.
    ///
    /// Frames are ordered exposure-major: all channels of the first exposure,
    /// then all channels of the second, and so on. All exposures must share
    /// the same shape, filter and wavelength solution.
    pub fn from_exposures(exposures: Vec<Exposure>) -> Result<Self, CubeIoError> {
        let first = exposures.first().ok_or(CubeIoError::Empty)?;
        let (n_channels, rows, cols) = first.data.dim();
        let header = first.header.clone();
        if n_channels == 0 || rows == 0 || cols == 0 {
            return Err(CubeIoError::InconsistentExposures {
                index: 0,
                reason: "exposure has an empty dimension".to_string(),
            });
        }

        for (index, exposure) in exposures.iter().enumerate().skip(1) {
            if exposure.data.dim() != (n_channels, rows, cols) {
                return Err(CubeIoError::InconsistentExposures {
                    index,
                    reason: format!(
                        "shape {:?} differs from {:?}",
                        exposure.data.dim(),
                        (n_channels, rows, cols)
                    ),
                });
            }
            if !exposure
                .header
                .filter_name
                .eq_ignore_ascii_case(&header.filter_name)
            {
                return Err(CubeIoError::InconsistentExposures {
                    index,
                    reason: format!(
                        "filter '{}' differs from '{}'",
                        exposure.header.filter_name, header.filter_name
                    ),
                });
            }
            if exposure.header.lam_min_nm != header.lam_min_nm
                || exposure.header.dloglam != header.dloglam
            {
                return Err(CubeIoError::InconsistentExposures {
                    index,
                    reason: "wavelength solution differs".to_string(),
                });
            }
        }

        let n_frames = exposures.len() * n_channels;
        let mut frames = Array3::<f64>::zeros((n_frames, rows, cols));
        let mut centers = Vec::with_capacity(n_frames);
        let mut rotations_deg = Vec::with_capacity(n_frames);
        let mut channels = Vec::with_capacity(n_frames);

        for (exp_idx, exposure) in exposures.iter().enumerate() {
            for channel in 0..n_channels {
                let frame_idx = exp_idx * n_channels + channel;
                frames
                    .index_axis_mut(Axis(0), frame_idx)
                    .assign(&exposure.data.index_axis(Axis(0), channel));
                centers.push(exposure.header.psf_center);
                rotations_deg.push(exposure.parallactic_angle_deg);
                channels.push(channel);
            }
        }

        Ok(Self {
            frames,
            centers,
            rotations_deg,
            channels,
            n_channels,
            header,
        })
    }

    pub fn header(&self) -> &CubeHeader {
        &self.header
    }

    pub fn frames(&self) -> &Array3<f64> {
        &self.frames
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len_of(Axis(0))
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Frame shape as `(rows, cols)`
    pub fn frame_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.frames.dim();
        (rows, cols)
    }

    /// Side length used to scale highpass cutoffs
    pub fn edge_length(&self) -> usize {
        self.frame_shape().1
    }

    pub fn frame(&self, index: usize) -> ArrayView2<'_, f64> {
        self.frames.index_axis(Axis(0), index)
    }

    pub fn frame_mut(&mut self, index: usize) -> ArrayViewMut2<'_, f64> {
        self.frames.index_axis_mut(Axis(0), index)
    }

    pub fn center(&self, index: usize) -> [f64; 2] {
        self.centers[index]
    }

    pub fn rotation_deg(&self, index: usize) -> f64 {
        self.rotations_deg[index]
    }

    pub fn channel(&self, index: usize) -> usize {
        self.channels[index]
    }

    /// Indices of all frames belonging to one wavelength channel
    pub fn frames_for_channel(&self, channel: usize) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == channel)
            .map(|(i, _)| i)
            .collect()
    }
}

/// A post-processed cube, one derotated and combined image per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedCube {
    pub header: CubeHeader,
    /// Reduced images `[channel, row, col]`
    pub data: Array3<f64>,
}

impl ReducedCube {
    pub fn n_channels(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn center(&self) -> [f64; 2] {
        self.header.psf_center
    }

    pub fn channel(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.n_channels()).then(|| self.data.index_axis(Axis(0), index))
    }
}
