//! Spatial normalization
//!
//! Resampling onto a fixed template grid followed by isotropic Gaussian
//! smoothing. Both operate frame by frame on the 4D volume.
//!
//! # Modules
//! - `resample`: Cubic B-spline resampling between voxel grids
//! - `smooth`: Separable Gaussian smoothing with mirror boundaries

pub mod resample;
pub mod smooth;

use std::path::Path;

use crate::error::Result;
use crate::nifti_io;
use crate::volume::{scaled_affine, Volume};

pub use resample::resample_to_grid;
pub use smooth::smooth_fwhm;

/// Default smoothing kernel width (mm)
pub const DEFAULT_FWHM_MM: f64 = 6.0;

/// Target voxel grid: dimensions and voxel-to-world affine
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateGrid {
    /// (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel index to world (mm), 4x4 row-major
    pub affine: [f64; 16],
}

impl TemplateGrid {
    /// Grid with the given shape and affine
    pub fn new(dims: (usize, usize, usize), affine: [f64; 16]) -> Self {
        Self { dims, affine }
    }

    /// MNI152 brain template at 3 mm isotropic resolution
    pub fn mni152_3mm() -> Self {
        Self::new((61, 73, 61), scaled_affine((3.0, 3.0, 3.0), (-90.0, -126.0, -72.0)))
    }

    /// The spatial grid of an existing volume
    pub fn of_volume(volume: &Volume) -> Self {
        let (nx, ny, nz, _) = volume.dims();
        Self::new((nx, ny, nz), volume.affine)
    }

    /// Read the grid of a template NIfTI image
    pub fn from_nifti_file(path: &Path) -> Result<Self> {
        let template = nifti_io::read_volume_file(path)?;
        Ok(Self::of_volume(&template))
    }

    /// Number of voxels in the grid
    pub fn n_voxels(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Voxel sizes (mm) as the column norms of the affine
    pub fn voxel_size(&self) -> (f64, f64, f64) {
        let a = &self.affine;
        let col = |c: usize| (a[c] * a[c] + a[4 + c] * a[4 + c] + a[8 + c] * a[8 + c]).sqrt();
        (col(0), col(1), col(2))
    }

    /// True when `volume` already lies on this grid
    pub fn matches(&self, volume: &Volume) -> bool {
        let (nx, ny, nz, _) = volume.dims();
        self.dims == (nx, ny, nz)
            && self.affine.iter().zip(volume.affine.iter()).all(|(a, b)| (a - b).abs() < 1e-9)
    }
}

impl Default for TemplateGrid {
    fn default() -> Self {
        Self::mni152_3mm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mni_grid() {
        let g = TemplateGrid::mni152_3mm();
        assert_eq!(g.n_voxels(), 61 * 73 * 61);
        assert_eq!(g.voxel_size(), (3.0, 3.0, 3.0));
        // Voxel (30, 42, 24) sits at the world origin
        let p = crate::volume::apply_affine(&g.affine, [30.0, 42.0, 24.0]);
        assert_eq!(p, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_matches_own_volume() {
        let vol = Volume::new(vec![0.0; 8], (2, 2, 2, 1), (2.0, 2.0, 2.0),
                              scaled_affine((2.0, 2.0, 2.0), (1.0, 0.0, 0.0)), 2.0).unwrap();
        assert!(TemplateGrid::of_volume(&vol).matches(&vol));
        assert!(!TemplateGrid::mni152_3mm().matches(&vol));
    }
}
