//! FITS containers for cubes.
//!
//! Each channel is stored as its own 2D image HDU named `CHANnnn`. Header
//! values are written onto every channel HDU. FITS rows already run
//! bottom-up, which matches the `row == y` convention used here, so images
//! are written without flipping.

use fitsio::compat::fitsfile::FitsFile;
use fitsio::compat::hdu::FitsHdu;
use fitsio::compat::images::{ImageDescription, ImageType, ReadImage, WriteImage};
use ndarray::{Array2, Array3, ArrayView3, Axis};
use std::path::Path;

use super::{CubeHeader, CubeIoError, Exposure, ReducedCube};

const CHANNEL_PREFIX: &str = "CHAN";

fn invalid(path: &Path, reason: impl Into<String>) -> CubeIoError {
    CubeIoError::InvalidData {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn write_header(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    header: &CubeHeader,
    parallactic_angle_deg: Option<f64>,
) -> Result<(), CubeIoError> {
    hdu.write_key(fptr, "FILTNAME", &header.filter_name.clone())?;
    hdu.write_key(fptr, "LAM_MIN", &header.lam_min_nm.to_string())?;
    hdu.write_key(fptr, "DLOGLAM", &header.dloglam.to_string())?;
    hdu.write_key(fptr, "PSFCENTX", &header.psf_center[0].to_string())?;
    hdu.write_key(fptr, "PSFCENTY", &header.psf_center[1].to_string())?;
    if let Some(angle) = parallactic_angle_deg {
        hdu.write_key(fptr, "PARANG", &angle.to_string())?;
    }
    Ok(())
}

fn read_float_key(
    fptr: &FitsFile,
    hdu: &FitsHdu,
    path: &Path,
    key: &str,
) -> Result<f64, CubeIoError> {
    let raw = hdu.read_key::<String>(fptr, key)?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| invalid(path, format!("header key {key} is not a number: '{raw}'")))
}

fn write_channels(
    path: &Path,
    data: ArrayView3<'_, f64>,
    header: &CubeHeader,
    parallactic_angle_deg: Option<f64>,
) -> Result<(), CubeIoError> {
    let mut fptr = FitsFile::create(path).overwrite().open()?;
    let (_, height, width) = data.dim();
    for (channel, image) in data.axis_iter(Axis(0)).enumerate() {
        let name = format!("{CHANNEL_PREFIX}{channel:03}");
        let description = ImageDescription {
            data_type: ImageType::Double,
            dimensions: vec![width, height],
        };
        let hdu = fptr.create_image(&name, &description)?;
        let flat: Vec<f64> = image.iter().copied().collect();
        f64::write_image(&mut fptr, &hdu, &flat)?;
        hdu.write_key(&mut fptr, "EXTNAME", &name.clone())?;
        write_header(&mut fptr, &hdu, header, parallactic_angle_deg)?;
    }
    Ok(())
}

struct ChannelStack {
    header: CubeHeader,
    parallactic_angle_deg: Option<f64>,
    data: Array3<f64>,
}

fn read_channels(path: &Path) -> Result<ChannelStack, CubeIoError> {
    let fptr = FitsFile::open(path)?;
    let mut images: Vec<Array2<f64>> = Vec::new();
    let mut header = None;
    let mut parallactic_angle_deg = None;

    let mut hdu_idx = 0;
    while let Ok(hdu) = fptr.hdu(hdu_idx) {
        hdu_idx += 1;
        let is_channel = hdu
            .read_key::<String>(&fptr, "EXTNAME")
            .map(|name| name.trim().starts_with(CHANNEL_PREFIX))
            .unwrap_or(false);
        if !is_channel {
            continue;
        }

        let width = hdu.read_key::<i64>(&fptr, "NAXIS1")? as usize;
        let height = hdu.read_key::<i64>(&fptr, "NAXIS2")? as usize;
        let flat = f64::read_image(&fptr, &hdu)?;
        let image = Array2::from_shape_vec((height, width), flat)
            .map_err(|e| invalid(path, format!("cannot reshape channel image: {e}")))?;
        images.push(image);

        if header.is_none() {
            let filter_name = hdu.read_key::<String>(&fptr, "FILTNAME")?;
            header = Some(CubeHeader {
                filter_name: filter_name.trim().to_string(),
                lam_min_nm: read_float_key(&fptr, &hdu, path, "LAM_MIN")?,
                dloglam: read_float_key(&fptr, &hdu, path, "DLOGLAM")?,
                psf_center: [
                    read_float_key(&fptr, &hdu, path, "PSFCENTX")?,
                    read_float_key(&fptr, &hdu, path, "PSFCENTY")?,
                ],
            });
            parallactic_angle_deg = read_float_key(&fptr, &hdu, path, "PARANG").ok();
        }
    }

    let header = header.ok_or_else(|| invalid(path, "no channel HDUs found"))?;
    let views: Vec<_> = images.iter().map(|image| image.view()).collect();
    let data = ndarray::stack(Axis(0), &views)
        .map_err(|e| invalid(path, format!("channel images differ in shape: {e}")))?;

    Ok(ChannelStack {
        header,
        parallactic_angle_deg,
        data,
    })
}

pub(super) fn read_exposure_fits(path: &Path) -> Result<Exposure, CubeIoError> {
    let stack = read_channels(path)?;
    let parallactic_angle_deg = stack
        .parallactic_angle_deg
        .ok_or_else(|| invalid(path, "missing PARANG header"))?;
    Ok(Exposure {
        header: stack.header,
        parallactic_angle_deg,
        data: stack.data,
    })
}

pub(super) fn write_exposure_fits(path: &Path, exposure: &Exposure) -> Result<(), CubeIoError> {
    write_channels(
        path,
        exposure.data.view(),
        &exposure.header,
        Some(exposure.parallactic_angle_deg),
    )
}

pub(super) fn read_reduced_fits(path: &Path) -> Result<ReducedCube, CubeIoError> {
    let stack = read_channels(path)?;
    Ok(ReducedCube {
        header: stack.header,
        data: stack.data,
    })
}

pub(super) fn write_reduced_fits(path: &Path, cube: &ReducedCube) -> Result<(), CubeIoError> {
    write_channels(path, cube.data.view(), &cube.header, None)
}
