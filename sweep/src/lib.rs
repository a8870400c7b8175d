//! Parameter sweeps for high-contrast imaging post-processing.
//!
//! A sweep takes a sequence of spectral exposures, injects synthetic
//! companions of known contrast into a copy of it, reduces both copies under
//! every combination of reduction parameters, and scores each combination by
//! its calibrated contrast curve and by how well its detections recover the
//! injected companions.
//!
//! The pieces, from the bottom up:
//!
//! - [`instrument`]: aperture geometry and the spectral flux calibration
//! - [`cube`]: exposures, the stacked input sequence and reduced cubes
//! - [`injection`]: synthetic sources and flux retrieval
//! - [`contrast`], [`detection`], [`classify`]: measurements on reduced cubes
//! - [`params`]: parameter sets and the identifier naming contract
//! - [`reduction`]: the [`reduction::Reducer`] collaborator
//! - [`trial`] and [`dataset`]: one parameter set, and the sweep over all of them
//! - [`analysis`]: scoring tables over a finished sweep

pub mod analysis;
pub mod classify;
pub mod config;
pub mod contrast;
pub mod cube;
pub mod dataset;
pub mod detection;
pub mod injection;
pub mod instrument;
pub mod layout;
pub mod manifest;
pub mod params;
pub mod plot;
pub mod reduction;
pub mod report;
pub mod trial;

pub use config::SweepConfig;
pub use dataset::{DatasetError, PhaseSummary, TestDataset};
pub use params::ParameterSet;
pub use reduction::{Reducer, ReductionJob};
pub use trial::Trial;
