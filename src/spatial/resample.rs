//! Cubic B-spline resampling between voxel grids
//!
//! Every target voxel centre is mapped to world space with the target affine
//! and back into the source grid with the inverse source affine. Each source
//! frame is converted to cubic B-spline coefficients (mirror boundary) and
//! evaluated at those points. Points outside the source field of view are
//! set to 0.

use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::spatial::TemplateGrid;
use crate::volume::{apply_affine, idx3d, invert_affine, Volume};

/// Slack allowed past the last voxel centre before a point counts as outside
const EDGE_TOL: f64 = 1e-6;

/// Pole of the cubic B-spline prefilter, `sqrt(3) - 2`
const POLE: f64 = -0.267_949_192_431_122_7;

//=============================================================================
// Spline prefilter
//=============================================================================

/// Replace samples by their cubic B-spline coefficients along one line
///
/// Recursive causal/anti-causal filter with whole-sample mirror boundaries.
fn prefilter_line(c: &mut [f64]) {
    let n = c.len();
    if n < 2 {
        return;
    }
    let z = POLE;
    let gain = (1.0 - z) * (1.0 - 1.0 / z);
    for v in c.iter_mut() {
        *v *= gain;
    }

    // Causal initial value for the mirrored signal
    let iz = 1.0 / z;
    let mut zn = z;
    let mut z2n = z.powi(n as i32 - 1);
    let mut sum = c[0] + z2n * c[n - 1];
    z2n = z2n * z2n * iz;
    for v in &c[1..n - 1] {
        sum += (zn + z2n) * v;
        zn *= z;
        z2n *= iz;
    }
    c[0] = sum / (1.0 - zn * zn);

    for k in 1..n {
        c[k] += z * c[k - 1];
    }

    c[n - 1] = (z / (z * z - 1.0)) * (z * c[n - 2] + c[n - 1]);
    for k in (0..n - 1).rev() {
        c[k] = z * (c[k + 1] - c[k]);
    }
}

/// Prefilter one 3D frame along every axis in place
fn prefilter_frame(frame: &mut [f64], dims: (usize, usize, usize)) {
    let (nx, ny, nz) = dims;
    for axis in 0..3 {
        let (n, stride, count) = match axis {
            0 => (nx, 1, ny * nz),
            1 => (ny, nx, nx * nz),
            _ => (nz, nx * ny, nx * ny),
        };
        if n < 2 {
            continue;
        }
        let mut line = vec![0.0; n];
        for l in 0..count {
            // Line origin: a voxel whose coordinate along the axis is 0
            let start = match axis {
                0 => l * nx,
                1 => (l % nx) + (l / nx) * nx * ny,
                _ => l,
            };
            for (p, v) in line.iter_mut().enumerate() {
                *v = frame[start + p * stride];
            }
            prefilter_line(&mut line);
            for (p, &v) in line.iter().enumerate() {
                frame[start + p * stride] = v;
            }
        }
    }
}

//=============================================================================
// Sampling plan
//=============================================================================

/// Whole-sample mirror of index `i` into `0..n`
#[inline]
fn mirror(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m > n as isize - 1 { (period - m) as usize } else { m as usize }
}

/// Cubic B-spline weights of the four neighbours `i-1..=i+2` at offset `t`
#[inline]
fn bspline_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        (1.0 - t).powi(3) / 6.0,
        (4.0 - 6.0 * t2 + 3.0 * t3) / 6.0,
        (1.0 + 3.0 * t + 3.0 * t2 - 3.0 * t3) / 6.0,
        t3 / 6.0,
    ]
}

/// Coefficient indices and weights along one axis
#[derive(Clone, Copy, Debug)]
struct AxisTaps {
    index: [usize; 4],
    weight: [f64; 4],
}

/// Locate continuous coordinate `c` on an axis of length `n`
fn axis_taps(c: f64, n: usize) -> Option<AxisTaps> {
    let max = (n - 1) as f64;
    if !(-EDGE_TOL..=max + EDGE_TOL).contains(&c) {
        return None;
    }
    let c = c.clamp(0.0, max);
    let i = (c.floor() as usize).min(n - 1);
    let weight = bspline_weights(c - i as f64);
    let mut index = [0; 4];
    for (k, idx) in index.iter_mut().enumerate() {
        *idx = mirror(i as isize - 1 + k as isize, n);
    }
    Some(AxisTaps { index, weight })
}

/// Taps of one target voxel
#[derive(Clone, Copy, Debug)]
struct Sample {
    taps: [AxisTaps; 3],
}

/// Precompute the spline taps of every target voxel
fn sample_plan(source: &Volume, grid: &TemplateGrid) -> Result<Vec<Option<Sample>>> {
    let inv = invert_affine(&source.affine)
        .ok_or_else(|| PipelineError::Nifti("source affine is singular".to_string()))?;
    let (sx, sy, sz, _) = source.dims();
    let (gx, gy, gz) = grid.dims;

    let mut plan = Vec::with_capacity(grid.n_voxels());
    for k in 0..gz {
        for j in 0..gy {
            for i in 0..gx {
                let world = apply_affine(&grid.affine, [i as f64, j as f64, k as f64]);
                let c = apply_affine(&inv, world);
                let sample = match (axis_taps(c[0], sx), axis_taps(c[1], sy), axis_taps(c[2], sz)) {
                    (Some(x), Some(y), Some(z)) => Some(Sample { taps: [x, y, z] }),
                    _ => None,
                };
                plan.push(sample);
            }
        }
    }
    Ok(plan)
}

/// Evaluate the spline of one prefiltered frame at a planned point
#[inline]
fn interpolate(coeffs: &[f64], s: &Sample, nx: usize, ny: usize) -> f64 {
    let [tx, ty, tz] = &s.taps;
    let mut value = 0.0;
    for (&z, &wz) in tz.index.iter().zip(tz.weight.iter()) {
        for (&y, &wy) in ty.index.iter().zip(ty.weight.iter()) {
            let wyz = wy * wz;
            let mut row = 0.0;
            for (&x, &wx) in tx.index.iter().zip(tx.weight.iter()) {
                row += wx * coeffs[idx3d(x, y, z, nx, ny)];
            }
            value += wyz * row;
        }
    }
    value
}

/// Resample every frame of `volume` onto `grid`
///
/// A volume already on the grid is returned unchanged.
pub fn resample_to_grid(volume: &Volume, grid: &TemplateGrid) -> Result<Volume> {
    if grid.matches(volume) {
        debug!("Volume already on the template grid");
        return Ok(volume.clone());
    }

    let (nx, ny, nz, nt) = volume.dims();
    let (gx, gy, gz) = grid.dims;
    info!("Resampling {}x{}x{} -> {}x{}x{} ({} frames)",
          volume.dims().0, volume.dims().1, volume.dims().2, gx, gy, gz, nt);

    let plan = sample_plan(volume, grid)?;
    let inside = plan.iter().filter(|s| s.is_some()).count();
    debug!("{} of {} template voxels inside the source field of view", inside, plan.len());

    let n_out = grid.n_voxels();
    let mut data = vec![0.0; n_out * nt];
    let mut coeffs = vec![0.0; nx * ny * nz];
    for t in 0..nt {
        coeffs.copy_from_slice(volume.frame(t));
        prefilter_frame(&mut coeffs, (nx, ny, nz));
        let out = &mut data[t * n_out..(t + 1) * n_out];
        for (o, s) in out.iter_mut().zip(plan.iter()) {
            if let Some(s) = s {
                *o = interpolate(&coeffs, s, nx, ny);
            }
        }
    }

    Volume::new(data, (gx, gy, gz, nt), grid.voxel_size(), grid.affine, volume.tr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::scaled_affine;
    use approx::assert_relative_eq;

    fn linear_volume() -> Volume {
        // 4x4x4, two frames, value = x + 2y + 3z (+ 10 in frame 1)
        let mut data = Vec::new();
        for t in 0..2 {
            for k in 0..4 {
                for j in 0..4 {
                    for i in 0..4 {
                        data.push(i as f64 + 2.0 * j as f64 + 3.0 * k as f64 + 10.0 * t as f64);
                    }
                }
            }
        }
        Volume::new(data, (4, 4, 4, 2), (2.0, 2.0, 2.0), scaled_affine((2.0, 2.0, 2.0), (0.0, 0.0, 0.0)), 1.5)
            .unwrap()
    }

    #[test]
    fn test_identity_grid() {
        let vol = linear_volume();
        let out = resample_to_grid(&vol, &TemplateGrid::of_volume(&vol)).unwrap();
        assert_eq!(out.data(), vol.data());
    }

    #[test]
    fn test_prefilter_interpolates_samples() {
        let data: Vec<f64> = (0..9).map(|k| ((k * 7) % 5) as f64 - 1.5).collect();
        let mut c = data.clone();
        prefilter_line(&mut c);
        let n = c.len();
        for (k, &d) in data.iter().enumerate() {
            let w = bspline_weights(0.0);
            let v: f64 = (0..4).map(|q| w[q] * c[mirror(k as isize - 1 + q as isize, n)]).sum();
            assert_relative_eq!(v, d, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_mirror_indices() {
        assert_eq!(mirror(-1, 5), 1);
        assert_eq!(mirror(5, 5), 3);
        assert_eq!(mirror(3, 2), 1);
        assert_eq!(mirror(-2, 1), 0);
    }

    #[test]
    fn test_on_grid_points_keep_values() {
        let vol = linear_volume();
        // 1 mm grid over the same extent: even indices land on source voxels
        let grid = TemplateGrid::new((7, 7, 7), scaled_affine((1.0, 1.0, 1.0), (0.0, 0.0, 0.0)));
        let out = resample_to_grid(&vol, &grid).unwrap();
        assert_eq!(out.dims(), (7, 7, 7, 2));
        assert_eq!(out.tr, 1.5);
        assert_eq!(out.voxel_size, (1.0, 1.0, 1.0));
        assert_relative_eq!(out.get(2, 4, 6, 0), 1.0 + 4.0 + 9.0, epsilon = 1e-9);
        assert_relative_eq!(out.get(6, 6, 6, 1), 3.0 + 6.0 + 9.0 + 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_quadratic_field_at_half_voxels() {
        // value = x^2 along a 24-voxel axis, constant across y and z
        let (nx, ny, nz) = (24, 3, 3);
        let mut data = Vec::with_capacity(nx * ny * nz);
        for _ in 0..nz {
            for _ in 0..ny {
                for i in 0..nx {
                    data.push((i * i) as f64);
                }
            }
        }
        let vol = Volume::new(data, (nx, ny, nz, 1), (1.0, 1.0, 1.0),
                              scaled_affine((1.0, 1.0, 1.0), (0.0, 0.0, 0.0)), 2.0).unwrap();
        let grid = TemplateGrid::new((8, 1, 1), scaled_affine((1.0, 1.0, 1.0), (0.5, 1.0, 1.0)));
        let out = resample_to_grid(&vol, &grid).unwrap();

        // x = 3.5 gives 12.25; trilinear would give 12.5
        assert_relative_eq!(out.get(3, 0, 0, 0), 12.25, epsilon = 1e-6);
        for i in 0..8 {
            let x = i as f64 + 0.5;
            assert_relative_eq!(out.get(i, 0, 0, 0), x * x, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_outside_field_of_view_is_zero() {
        let vol = linear_volume();
        let grid = TemplateGrid::new((3, 1, 1), scaled_affine((4.0, 1.0, 1.0), (-4.0, 2.0, 2.0)));
        let out = resample_to_grid(&vol, &grid).unwrap();
        // x = -4 mm is outside, x = 0 and x = 4 mm are inside
        assert_eq!(out.get(0, 0, 0, 0), 0.0);
        assert_relative_eq!(out.get(1, 0, 0, 0), 0.0 + 2.0 + 3.0, epsilon = 1e-9);
        assert_relative_eq!(out.get(2, 0, 0, 0), 2.0 + 2.0 + 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_constant_volume_stays_constant() {
        let vol = Volume::new(vec![5.0; 64], (4, 4, 4, 1), (3.0, 3.0, 3.0),
                              scaled_affine((3.0, 3.0, 3.0), (0.0, 0.0, 0.0)), 2.0).unwrap();
        let grid = TemplateGrid::new((5, 5, 5), scaled_affine((2.0, 2.0, 2.0), (0.5, 0.5, 0.5)));
        let out = resample_to_grid(&vol, &grid).unwrap();
        // Points up to 8.5 mm stay within the 0..9 mm source extent
        for &v in out.data() {
            assert_relative_eq!(v, 5.0, epsilon = 1e-9);
        }
    }
}
