//! Isotropic Gaussian smoothing
//!
//! Separable 1D convolutions along x, y and z with a kernel truncated at
//! four standard deviations. Boundaries are mirrored about the edge
//! (half-sample symmetric: `d c b a | a b c d | d c b a`).

use tracing::{debug, info};

use crate::error::Result;
use crate::volume::Volume;

/// Kernel half-width in standard deviations
const TRUNCATE: f64 = 4.0;

/// Convert a FWHM in mm to a standard deviation in voxels
#[inline]
pub fn fwhm_to_sigma(fwhm: f64, voxel_size: f64) -> f64 {
    fwhm / (8.0 * 2.0_f64.ln()).sqrt() / voxel_size
}

/// Normalized 1D Gaussian kernel of radius `round(TRUNCATE * sigma)`
fn make_gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as usize;
    let size = 2 * radius + 1;
    let mut kernel = vec![0.0; size];

    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut sum = 0.0;

    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f64 - radius as f64;
        *k = (-x * x / two_sigma_sq).exp();
        sum += *k;
    }

    for k in kernel.iter_mut() {
        *k /= sum;
    }

    kernel
}

/// Mirror an out-of-range index back into `0..n`
#[inline]
fn reflect(idx: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = idx.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Convolve every line along one axis of a 3D array
///
/// # Arguments
/// * `data` - Input array (nx * ny * nz), Fortran order
/// * `out` - Output array of the same size
/// * `dims` - (nx, ny, nz)
/// * `axis` - 0, 1 or 2
/// * `kernel` - Odd-length symmetric kernel
fn convolve_axis(data: &[f64], out: &mut [f64], dims: (usize, usize, usize), axis: usize, kernel: &[f64]) {
    let (nx, ny, nz) = dims;
    let (n, stride) = match axis {
        0 => (nx, 1),
        1 => (ny, nx),
        _ => (nz, nx * ny),
    };
    let half = (kernel.len() / 2) as isize;
    let mut line = vec![0.0; n];

    // Every line starts at a voxel whose coordinate along `axis` is 0
    let starts: Vec<usize> = (0..nx * ny * nz)
        .filter(|&idx| {
            let c = match axis {
                0 => idx % nx,
                1 => (idx / nx) % ny,
                _ => idx / (nx * ny),
            };
            c == 0
        })
        .collect();

    for start in starts {
        for (p, l) in line.iter_mut().enumerate() {
            *l = data[start + p * stride];
        }
        for p in 0..n {
            let mut sum = 0.0;
            for (ki, &kv) in kernel.iter().enumerate() {
                let q = reflect(p as isize + ki as isize - half, n);
                sum += line[q] * kv;
            }
            out[start + p * stride] = sum;
        }
    }
}

/// Smooth one 3D frame in place
///
/// # Arguments
/// * `frame` - Frame data (nx * ny * nz), non-finite values are zeroed
/// * `dims` - (nx, ny, nz)
/// * `sigma` - Standard deviation per axis in voxels (0 skips the axis)
pub fn smooth_frame(frame: &mut [f64], dims: (usize, usize, usize), sigma: [f64; 3]) {
    for v in frame.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }

    let mut temp = vec![0.0; frame.len()];
    for (axis, &s) in sigma.iter().enumerate() {
        if s > 0.0 {
            let kernel = make_gaussian_kernel(s);
            convolve_axis(frame, &mut temp, dims, axis, &kernel);
            frame.copy_from_slice(&temp);
        }
    }
}

/// Smooth every frame with an isotropic Gaussian of the given FWHM (mm)
///
/// The per-axis width in voxels follows the volume's voxel sizes. A FWHM
/// of 0 only replaces non-finite values.
pub fn smooth_fwhm(volume: &Volume, fwhm: f64) -> Result<Volume> {
    let (nx, ny, nz, nt) = volume.dims();
    let (vx, vy, vz) = volume.voxel_size;
    let sigma = if fwhm > 0.0 {
        [fwhm_to_sigma(fwhm, vx), fwhm_to_sigma(fwhm, vy), fwhm_to_sigma(fwhm, vz)]
    } else {
        [0.0; 3]
    };
    info!("Smoothing {} frames with FWHM {} mm", nt, fwhm);
    debug!("Gaussian sigma (voxels): {:.3} {:.3} {:.3}", sigma[0], sigma[1], sigma[2]);

    let n = volume.n_voxels();
    let mut data = volume.data().to_vec();
    for frame in data.chunks_mut(n.max(1)) {
        smooth_frame(frame, (nx, ny, nz), sigma);
    }
    volume.with_data(data)
}
