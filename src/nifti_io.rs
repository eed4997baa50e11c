//! NIfTI file I/O for 4D functional volumes
//!
//! Loads .nii and .nii.gz (gzip is auto-detected) into a [`Volume`] and
//! writes volumes back as NIfTI-1 single files with float32 data.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::volume::Volume;

/// NIfTI `xyzt_units` time codes
const UNITS_SEC: u8 = 8;
const UNITS_MSEC: u8 = 16;
const UNITS_USEC: u8 = 24;

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Get header info for diagnostics
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("file too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Get affine transformation matrix from header
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    // Prefer sform if available (sform_code > 0)
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        // Fall back to identity with voxel scaling
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Repetition time in seconds from pixdim[4] and the time unit code
fn get_tr(header: &NiftiHeader) -> f64 {
    let raw = header.pixdim[4] as f64;
    match header.xyzt_units & 0x38 {
        UNITS_MSEC => raw / 1_000.0,
        UNITS_USEC => raw / 1_000_000.0,
        UNITS_SEC => raw,
        _ => raw,
    }
}

/// Load a 3D or 4D NIfTI volume from bytes
///
/// 3D images are returned with a single timepoint. Data is scaled by
/// scl_slope/scl_inter during conversion.
pub fn load_volume(bytes: &[u8]) -> Result<Volume> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        let decoder = GzDecoder::new(Cursor::new(bytes));
        InMemNiftiObject::from_reader(decoder)
            .map_err(|e| {
                // Try to get header info from decompressed data
                let mut decoder2 = GzDecoder::new(Cursor::new(bytes));
                let mut decompressed = Vec::new();
                let info = if std::io::Read::read_to_end(&mut decoder2, &mut decompressed).is_ok() {
                    get_header_info(&decompressed)
                } else {
                    "could not decompress".to_string()
                };
                PipelineError::Nifti(format!("failed to read gzipped NIfTI: {} ({})", e, info))
            })?
    } else {
        let info = get_header_info(bytes);
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| PipelineError::Nifti(format!("failed to read NIfTI: {} ({})", e, info)))?
    };

    let header = obj.header();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(PipelineError::Nifti(format!("expected at least 3D volume, got {}D", ndim)));
    }

    let voxel_size = (
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    );
    let affine = get_affine(header);
    let tr = get_tr(header);

    let volume = obj.into_volume();
    let array: Array<f64, _> = volume.into_ndarray()
        .map_err(|e| PipelineError::Nifti(format!("failed to convert to ndarray: {}", e)))?;

    let shape = array.shape();
    if shape.len() < 3 || shape.len() > 4 {
        return Err(PipelineError::Nifti(format!("expected a 3D or 4D array, got {}D", shape.len())));
    }

    // Use the actual array shape for dimensions (nifti-rs may reorder)
    let (dim0, dim1, dim2) = (shape[0], shape[1], shape[2]);
    let dim3 = if shape.len() >= 4 { shape[3] } else { 1 };

    // Fortran order: x fastest, t slowest
    let mut data = Vec::with_capacity(dim0 * dim1 * dim2 * dim3);
    if shape.len() == 3 {
        for k in 0..dim2 {
            for j in 0..dim1 {
                for i in 0..dim0 {
                    data.push(array[[i, j, k]]);
                }
            }
        }
    } else {
        for t in 0..dim3 {
            for k in 0..dim2 {
                for j in 0..dim1 {
                    for i in 0..dim0 {
                        data.push(array[[i, j, k, t]]);
                    }
                }
            }
        }
    }

    debug!(
        "Loaded NIfTI {}x{}x{}x{}, voxel {:.2}x{:.2}x{:.2} mm, TR {:.3} s",
        dim0, dim1, dim2, dim3, voxel_size.0, voxel_size.1, voxel_size.2, tr
    );

    Volume::new(data, (dim0, dim1, dim2, dim3), voxel_size, affine, tr)
}

/// Read a volume from a .nii or .nii.gz file
pub fn read_volume_file(path: &Path) -> Result<Volume> {
    if !path.exists() {
        return Err(PipelineError::MissingInput { what: "NIfTI volume", path: path.to_path_buf() });
    }
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    load_volume(&bytes)
}

/// Save a volume as uncompressed NIfTI-1 bytes (float32 data)
pub fn save_volume(volume: &Volume) -> Result<Vec<u8>> {
    let (nx, ny, nz, nt) = volume.dims();
    let (vsx, vsy, vsz) = volume.voxel_size;
    let affine = &volume.affine;

    for &d in &[nx, ny, nz, nt] {
        if d > i16::MAX as usize {
            return Err(PipelineError::Nifti(format!("dimension {} exceeds NIfTI-1 limit", d)));
        }
    }

    // Create NIfTI-1 header (348 bytes)
    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7]
    let ndim: i16 = if nt > 1 { 4 } else { 3 };
    let dim: [i16; 8] = [ndim, nx as i16, ny as i16, nz as i16, nt as i16, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    // pixdim[0..7], TR in pixdim[4]
    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, volume.tr as f32, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4 bytes extension)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // xyzt_units = mm | sec
    header[123] = 2 | UNITS_SEC;

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    // srow_x, srow_y, srow_z
    for row in 0..3 {
        for i in 0..4 {
            let offset = 280 + row * 16 + i * 4;
            header[offset..offset + 4].copy_from_slice(&(affine[row * 4 + i] as f32).to_le_bytes());
        }
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    let data = volume.data();
    let mut buffer = Vec::with_capacity(352 + data.len() * 4);

    buffer.write_all(&header)
        .map_err(|e| PipelineError::Nifti(format!("write header failed: {}", e)))?;

    // Extension (4 bytes, all zeros = no extension)
    buffer.write_all(&[0u8; 4])
        .map_err(|e| PipelineError::Nifti(format!("write extension failed: {}", e)))?;

    for &val in data {
        buffer.write_all(&(val as f32).to_le_bytes())
            .map_err(|e| PipelineError::Nifti(format!("write data failed: {}", e)))?;
    }

    Ok(buffer)
}

/// Save a volume as gzipped NIfTI bytes (.nii.gz)
pub fn save_volume_gz(volume: &Volume) -> Result<Vec<u8>> {
    let uncompressed = save_volume(volume)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&uncompressed)
        .map_err(|e| PipelineError::Nifti(format!("gzip compression failed: {}", e)))?;

    encoder.finish()
        .map_err(|e| PipelineError::Nifti(format!("gzip finish failed: {}", e)))
}

/// Write a volume to disk, gzipping when the path ends in `.gz`
pub fn write_volume_file(path: &Path, volume: &Volume) -> Result<()> {
    let gz = path.extension().map_or(false, |ext| ext == "gz");
    let bytes = if gz { save_volume_gz(volume)? } else { save_volume(volume)? };
    if volume.tr <= 0.0 {
        warn!("Writing {} without a repetition time", path.display());
    }
    fs::write(path, bytes).map_err(|e| PipelineError::io(path, e))
}
