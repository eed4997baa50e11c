//! 4D BOLD volume container
//!
//! Data is stored flat in Fortran order to match the NIfTI convention:
//! index = x + y*nx + z*nx*ny + t*nx*ny*nz. Each frame (one timepoint) is
//! therefore a contiguous slice, while a voxel's time series is strided.

use crate::error::{PipelineError, Result};

/// Index into a 3D array stored in Fortran order (column-major)
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// Identity affine with the given voxel sizes on the diagonal
pub fn scaled_affine(voxel_size: (f64, f64, f64), origin: (f64, f64, f64)) -> [f64; 16] {
    let (vsx, vsy, vsz) = voxel_size;
    let (ox, oy, oz) = origin;
    [
        vsx, 0.0, 0.0, ox,
        0.0, vsy, 0.0, oy,
        0.0, 0.0, vsz, oz,
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Apply a row-major 4x4 affine to a point
#[inline]
pub fn apply_affine(affine: &[f64; 16], p: [f64; 3]) -> [f64; 3] {
    [
        affine[0] * p[0] + affine[1] * p[1] + affine[2] * p[2] + affine[3],
        affine[4] * p[0] + affine[5] * p[1] + affine[6] * p[2] + affine[7],
        affine[8] * p[0] + affine[9] * p[1] + affine[10] * p[2] + affine[11],
    ]
}

/// Invert a row-major 4x4 affine whose last row is (0, 0, 0, 1)
///
/// Returns `None` when the linear part is singular.
pub fn invert_affine(a: &[f64; 16]) -> Option<[f64; 16]> {
    let (m00, m01, m02) = (a[0], a[1], a[2]);
    let (m10, m11, m12) = (a[4], a[5], a[6]);
    let (m20, m21, m22) = (a[8], a[9], a[10]);

    let c00 = m11 * m22 - m12 * m21;
    let c01 = m12 * m20 - m10 * m22;
    let c02 = m10 * m21 - m11 * m20;
    let det = m00 * c00 + m01 * c01 + m02 * c02;
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;

    // Inverse of the 3x3 block via the adjugate
    let r = [
        c00 * inv_det,
        (m02 * m21 - m01 * m22) * inv_det,
        (m01 * m12 - m02 * m11) * inv_det,
        c01 * inv_det,
        (m00 * m22 - m02 * m20) * inv_det,
        (m02 * m10 - m00 * m12) * inv_det,
        c02 * inv_det,
        (m01 * m20 - m00 * m21) * inv_det,
        (m00 * m11 - m01 * m10) * inv_det,
    ];

    let (tx, ty, tz) = (a[3], a[7], a[11]);
    Some([
        r[0], r[1], r[2], -(r[0] * tx + r[1] * ty + r[2] * tz),
        r[3], r[4], r[5], -(r[3] * tx + r[4] * ty + r[5] * tz),
        r[6], r[7], r[8], -(r[6] * tx + r[7] * ty + r[8] * tz),
        0.0, 0.0, 0.0, 1.0,
    ])
}

/// A 4D functional volume with its spatial and temporal metadata
#[derive(Clone, Debug)]
pub struct Volume {
    data: Vec<f64>,
    dims: (usize, usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Voxel index to world (mm) transform, 4x4 row-major
    pub affine: [f64; 16],
    /// Repetition time in seconds
    pub tr: f64,
}

impl Volume {
    /// Build a volume, checking that the data length matches the dimensions
    pub fn new(
        data: Vec<f64>,
        dims: (usize, usize, usize, usize),
        voxel_size: (f64, f64, f64),
        affine: [f64; 16],
        tr: f64,
    ) -> Result<Self> {
        let (nx, ny, nz, nt) = dims;
        let expected = nx * ny * nz * nt;
        if data.len() != expected {
            return Err(PipelineError::Nifti(format!(
                "data length {} does not match {}x{}x{}x{} = {}",
                data.len(), nx, ny, nz, nt, expected
            )));
        }
        Ok(Self { data, dims, voxel_size, affine, tr })
    }

    /// A volume with the same grid and timing but new voxel values
    pub fn with_data(&self, data: Vec<f64>) -> Result<Self> {
        Self::new(data, self.dims, self.voxel_size, self.affine, self.tr)
    }

    /// (nx, ny, nz, nt)
    pub fn dims(&self) -> (usize, usize, usize, usize) {
        self.dims
    }

    /// Number of voxels in one frame
    pub fn n_voxels(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Number of timepoints
    pub fn n_timepoints(&self) -> usize {
        self.dims.3
    }

    /// Raw flat data
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Consume the volume and return its flat data
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Value at voxel (i, j, k) and timepoint t
    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize, t: usize) -> f64 {
        let (nx, ny, _, _) = self.dims;
        self.data[idx3d(i, j, k, nx, ny) + t * self.n_voxels()]
    }

    /// One timepoint as a contiguous 3D slice
    pub fn frame(&self, t: usize) -> &[f64] {
        let n = self.n_voxels();
        &self.data[t * n..(t + 1) * n]
    }

    /// Time series of the voxel with flat spatial index `v`
    pub fn voxel_series(&self, v: usize) -> Vec<f64> {
        let n = self.n_voxels();
        (0..self.n_timepoints()).map(|t| self.data[v + t * n]).collect()
    }

    /// Build a new volume by transforming every voxel's time series
    ///
    /// The closure receives the series in a scratch buffer and edits it in
    /// place; the buffer length is the number of timepoints.
    pub fn map_voxel_series<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(&mut [f64]),
    {
        let n = self.n_voxels();
        let nt = self.n_timepoints();
        let mut out = vec![0.0; self.data.len()];
        let mut buf = vec![0.0; nt];

        for v in 0..n {
            for t in 0..nt {
                buf[t] = self.data[v + t * n];
            }
            f(&mut buf);
            for t in 0..nt {
                out[v + t * n] = buf[t];
            }
        }

        self.with_data(out)
    }

    /// World coordinates (mm) of voxel centre (i, j, k)
    pub fn voxel_to_world(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        apply_affine(&self.affine, [i as f64, j as f64, k as f64])
    }
}
