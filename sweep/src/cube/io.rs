//! Reading and writing cubes on disk.
//!
//! Two container formats are supported. JSON is always available and is what
//! the sweep writes by default; FITS is available with the `fits` feature.
//! The format of an existing file is inferred from its extension.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::{CubeIoError, Exposure, ReducedCube};

/// On-disk container format for cubes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CubeFormat {
    #[default]
    Json,
    Fits,
}

impl CubeFormat {
    /// File extension written for this format (without the dot)
    pub fn extension(&self) -> &'static str {
        match self {
            CubeFormat::Json => "json",
            CubeFormat::Fits => "fits",
        }
    }

    /// Infer the format from a file's extension
    pub fn from_path(path: &Path) -> Result<Self, CubeIoError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(CubeFormat::Json),
            Some("fits") | Some("fit") | Some("fts") => Ok(CubeFormat::Fits),
            _ => Err(CubeIoError::UnknownExtension(path.to_path_buf())),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CubeIoError> {
    let file = File::open(path).map_err(|source| CubeIoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| CubeIoError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CubeIoError> {
    let io_err = |source| CubeIoError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|source| CubeIoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)
}

/// Read one raw exposure.
pub fn read_exposure(path: &Path) -> Result<Exposure, CubeIoError> {
    match CubeFormat::from_path(path)? {
        CubeFormat::Json => read_json(path),
        CubeFormat::Fits => read_exposure_fits(path),
    }
}

/// Write one raw exposure, mainly for building synthetic input sets.
pub fn write_exposure(
    path: &Path,
    exposure: &Exposure,
    format: CubeFormat,
) -> Result<(), CubeIoError> {
    match format {
        CubeFormat::Json => write_json(path, exposure),
        CubeFormat::Fits => write_exposure_fits(path, exposure),
    }
}

/// Read a reduced cube produced by a reducer.
pub fn read_reduced_cube(path: &Path) -> Result<ReducedCube, CubeIoError> {
    let cube: ReducedCube = match CubeFormat::from_path(path)? {
        CubeFormat::Json => read_json(path)?,
        CubeFormat::Fits => read_reduced_fits(path)?,
    };
    if cube.n_channels() == 0 {
        return Err(CubeIoError::InvalidData {
            path: path.to_path_buf(),
            reason: "cube has no channels".to_string(),
        });
    }
    Ok(cube)
}

/// Write a reduced cube.
pub fn write_reduced_cube(
    path: &Path,
    cube: &ReducedCube,
    format: CubeFormat,
) -> Result<(), CubeIoError> {
    match format {
        CubeFormat::Json => write_json(path, cube),
        CubeFormat::Fits => write_reduced_fits(path, cube),
    }
}

#[cfg(feature = "fits")]
use super::fits::{read_exposure_fits, read_reduced_fits, write_exposure_fits, write_reduced_fits};

#[cfg(not(feature = "fits"))]
fn read_exposure_fits(_path: &Path) -> Result<Exposure, CubeIoError> {
    Err(CubeIoError::FormatUnavailable("FITS", "fits"))
}

#[cfg(not(feature = "fits"))]
fn write_exposure_fits(_path: &Path, _exposure: &Exposure) -> Result<(), CubeIoError> {
    Err(CubeIoError::FormatUnavailable("FITS", "fits"))
}

#[cfg(not(feature = "fits"))]
fn read_reduced_fits(_path: &Path) -> Result<ReducedCube, CubeIoError> {
    Err(CubeIoError::FormatUnavailable("FITS", "fits"))
}

#[cfg(not(feature = "fits"))]
fn write_reduced_fits(_path: &Path, _cube: &ReducedCube) -> Result<(), CubeIoError> {
    Err(CubeIoError::FormatUnavailable("FITS", "fits"))
}
