//! Region-of-interest time series
//!
//! Each atlas seed defines a sphere of voxels; the region signal is the mean
//! over the sphere at every timepoint. The mean series is detrended and
//! band-passed, then kept in two forms: z-scored (standardized) and
//! un-normalized (raw).

use ndarray::Array2;
use tracing::{debug, info};

use crate::atlas::Atlas;
use crate::error::{PipelineError, Result};
use crate::filter::BandPass;
use crate::signal::{detrend_linear, zscore};
use crate::volume::{apply_affine, idx3d, invert_affine, Volume};

/// Default sphere radius (mm)
pub const DEFAULT_RADIUS_MM: f64 = 5.0;

/// Region signals, one column per region (timepoints x regions)
pub type RegionTimeSeries = Array2<f64>;

/// Both parametrizations of the region signals
#[derive(Clone, Debug)]
pub struct RegionSignals {
    /// Detrended, band-passed and z-scored
    pub standardized: RegionTimeSeries,
    /// Detrended and band-passed, no variance normalization
    pub raw: RegionTimeSeries,
}

/// Flat spatial indices of the voxels making up one seed's sphere
///
/// Voxels whose centre lies within `radius` mm of the seed, plus the voxel
/// nearest to the seed when it lies inside the grid. Sorted ascending.
///
/// # Arguments
/// * `dims` - Grid dimensions (nx, ny, nz)
/// * `affine` - Voxel to world transform of the grid
/// * `seed` - Seed position in world mm
/// * `radius` - Sphere radius in mm
pub fn sphere_voxels(dims: (usize, usize, usize), affine: &[f64; 16], seed: [f64; 3], radius: f64) -> Result<Vec<usize>> {
    let (nx, ny, nz) = dims;
    let inv = invert_affine(affine)
        .ok_or_else(|| PipelineError::Nifti("volume affine is singular".to_string()))?;

    // Voxel-space bounding box of the world cube around the seed
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for corner in 0..8 {
        let p = [
            seed[0] + if corner & 1 == 0 { -radius } else { radius },
            seed[1] + if corner & 2 == 0 { -radius } else { radius },
            seed[2] + if corner & 4 == 0 { -radius } else { radius },
        ];
        let v = apply_affine(&inv, p);
        for d in 0..3 {
            lo[d] = lo[d].min(v[d]);
            hi[d] = hi[d].max(v[d]);
        }
    }
    let clip = |v: f64, n: usize| -> usize { v.max(0.0).min(n as f64 - 1.0) as usize };
    let range = |d: usize, n: usize| -> Option<(usize, usize)> {
        if hi[d] < 0.0 || lo[d] > n as f64 - 1.0 {
            None
        } else {
            Some((clip(lo[d].floor(), n), clip(hi[d].ceil(), n)))
        }
    };

    let r2 = radius * radius;
    let mut voxels = Vec::new();
    if let (Some((i0, i1)), Some((j0, j1)), Some((k0, k1))) = (range(0, nx), range(1, ny), range(2, nz)) {
        for k in k0..=k1 {
            for j in j0..=j1 {
                for i in i0..=i1 {
                    let w = apply_affine(affine, [i as f64, j as f64, k as f64]);
                    let d2 = (w[0] - seed[0]).powi(2) + (w[1] - seed[1]).powi(2) + (w[2] - seed[2]).powi(2);
                    if d2 <= r2 {
                        voxels.push(idx3d(i, j, k, nx, ny));
                    }
                }
            }
        }
    }

    // Nearest voxel by rounding the seed's voxel coordinate
    let c = apply_affine(&inv, seed);
    let nearest = [c[0].round(), c[1].round(), c[2].round()];
    let inside = nearest.iter().zip([nx, ny, nz]).all(|(&v, n)| v >= 0.0 && v < n as f64);
    if inside {
        let idx = idx3d(nearest[0] as usize, nearest[1] as usize, nearest[2] as usize, nx, ny);
        if let Err(pos) = voxels.binary_search(&idx) {
            voxels.insert(pos, idx);
        }
    }

    Ok(voxels)
}

/// Voxel membership of every atlas sphere on one grid
#[derive(Clone, Debug)]
pub struct RegionMasker {
    spheres: Vec<Vec<usize>>,
}

impl RegionMasker {
    /// Resolve every seed of `atlas` on the grid of `volume`
    ///
    /// A sphere without voxels is an error; the feature layout cannot skip regions.
    pub fn new(atlas: &Atlas, volume: &Volume, radius: f64) -> Result<Self> {
        let (nx, ny, nz, _) = volume.dims();
        let mut spheres = Vec::with_capacity(atlas.len());
        for (r, region) in atlas.regions().iter().enumerate() {
            let voxels = sphere_voxels((nx, ny, nz), &volume.affine, region.coords(), radius)?;
            if voxels.is_empty() {
                return Err(PipelineError::EmptyRegion { index: r + 1, x: region.x, y: region.y, z: region.z });
            }
            spheres.push(voxels);
        }
        let total: usize = spheres.iter().map(|s| s.len()).sum();
        debug!("{} spheres, {:.1} voxels per sphere on average", spheres.len(), total as f64 / spheres.len().max(1) as f64);
        Ok(Self { spheres })
    }

    /// Voxel indices of each sphere, in atlas order
    pub fn spheres(&self) -> &[Vec<usize>] {
        &self.spheres
    }

    /// Mean signal of every sphere (timepoints x regions)
    pub fn mean_signals(&self, volume: &Volume) -> RegionTimeSeries {
        let nt = volume.n_timepoints();
        let mut out = Array2::zeros((nt, self.spheres.len()));
        for t in 0..nt {
            let frame = volume.frame(t);
            for (r, voxels) in self.spheres.iter().enumerate() {
                let sum: f64 = voxels.iter().map(|&v| frame[v]).sum();
                out[[t, r]] = sum / voxels.len() as f64;
            }
        }
        out
    }
}

/// Extract both parametrizations of the region signals
///
/// # Arguments
/// * `volume` - Fully processed volume
/// * `atlas` - Seed coordinates
/// * `radius` - Sphere radius in mm
/// * `filter` - Band-pass applied to each region signal
pub fn extract_region_series(volume: &Volume, atlas: &Atlas, radius: f64, filter: &BandPass) -> Result<RegionSignals> {
    info!("Extracting {} region signals (radius {} mm)", atlas.len(), radius);
    let masker = RegionMasker::new(atlas, volume, radius)?;
    let means = masker.mean_signals(volume);

    let mut raw = means;
    for mut column in raw.columns_mut() {
        let mut series = column.to_vec();
        detrend_linear(&mut series);
        filter.apply(&mut series);
        for (c, v) in column.iter_mut().zip(series) {
            *c = v;
        }
    }

    let mut standardized = raw.clone();
    for mut column in standardized.columns_mut() {
        let mut series = column.to_vec();
        zscore(&mut series);
        for (c, v) in column.iter_mut().zip(series) {
            *c = v;
        }
    }

    Ok(RegionSignals { standardized, raw })
}
