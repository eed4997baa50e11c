//! Nuisance regression
//!
//! Removes motion, tissue and CompCor confound signals from every voxel.
//! Signals are linearly detrended; confound columns are detrended, z-scored
//! and orthonormalized so that degenerate (constant or collinear) columns
//! drop out instead of destabilizing the fit.

use tracing::{debug, info};

use crate::confounds::ConfoundTable;
use crate::error::Result;
use crate::signal::{detrend_linear, std_dev, VARIANCE_EPS};
use crate::volume::Volume;

/// Default name prefix of the noise-component regressors
pub const DEFAULT_COMPONENT_PREFIX: &str = "a_comp_cor_";

/// Default number of noise components entering the design
pub const DEFAULT_MAX_COMPONENTS: usize = 5;

/// Columns whose residual norm falls below this are rank-deficient
const RANK_TOL: f64 = 100.0 * f64::EPSILON;

/// Orthonormal basis of the nuisance subspace, one vector per kept column
#[derive(Clone, Debug)]
pub struct NuisanceBasis {
    basis: Vec<Vec<f64>>,
    /// Names of the design columns that were offered
    pub columns: Vec<String>,
}

impl NuisanceBasis {
    /// Build the basis from raw design columns (each of length nt)
    pub fn from_design(columns: Vec<String>, design: Vec<Vec<f64>>) -> Self {
        let mut basis: Vec<Vec<f64>> = Vec::with_capacity(design.len());

        for mut col in design {
            detrend_linear(&mut col);
            let s = std_dev(&col);
            if s >= VARIANCE_EPS {
                for v in col.iter_mut() {
                    *v /= s;
                }
            }

            // Modified Gram-Schmidt against the vectors kept so far
            for q in &basis {
                let dot: f64 = q.iter().zip(col.iter()).map(|(a, b)| a * b).sum();
                for (c, &qv) in col.iter_mut().zip(q.iter()) {
                    *c -= dot * qv;
                }
            }

            let norm = col.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > RANK_TOL {
                for v in col.iter_mut() {
                    *v /= norm;
                }
                basis.push(col);
            }
        }

        Self { basis, columns }
    }

    /// Build the basis from the confound table's nuisance columns
    ///
    /// Missing cells are treated as zero; absent columns are skipped.
    pub fn from_confounds(confounds: &ConfoundTable, component_prefix: &str, max_components: usize) -> Self {
        let columns = confounds.nuisance_columns(component_prefix, max_components);
        let design = columns.iter()
            .filter_map(|name| confounds.column_filled(name))
            .collect();
        Self::from_design(columns, design)
    }

    /// Rank of the nuisance subspace
    pub fn rank(&self) -> usize {
        self.basis.len()
    }

    /// Detrend `series` and project the nuisance subspace out of it
    pub fn clean(&self, series: &mut [f64]) {
        detrend_linear(series);
        for q in &self.basis {
            let dot: f64 = q.iter().zip(series.iter()).map(|(a, b)| a * b).sum();
            for (s, &qv) in series.iter_mut().zip(q.iter()) {
                *s -= dot * qv;
            }
        }
    }
}

/// Regress the confound table's nuisance design out of every voxel
pub fn regress_out(
    volume: &Volume,
    confounds: &ConfoundTable,
    component_prefix: &str,
    max_components: usize,
) -> Result<Volume> {
    confounds.check_alignment(volume.n_timepoints())?;

    let basis = NuisanceBasis::from_confounds(confounds, component_prefix, max_components);
    debug!("Nuisance columns: {:?}", basis.columns);
    info!(
        "Regressing {} nuisance columns (rank {}) from {} voxels",
        basis.columns.len(),
        basis.rank(),
        volume.n_voxels()
    );

    volume.map_voxel_series(|series| basis.clean(series))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::mean;
    use crate::volume::scaled_affine;

    fn column(values: Vec<f64>) -> Vec<Option<f64>> {
        values.into_iter().map(Some).collect()
    }

    #[test]
    fn test_constant_columns_dropped() {
        let nt = 30;
        let basis = NuisanceBasis::from_design(
            vec!["X".into(), "Y".into()],
            vec![vec![1.0; nt], vec![-3.5; nt]],
        );
        assert_eq!(basis.rank(), 0);
    }

    #[test]
    fn test_collinear_columns_dropped() {
        let nt = 40;
        let a: Vec<f64> = (0..nt).map(|t| (t as f64 * 0.7).sin()).collect();
        let b: Vec<f64> = a.iter().map(|v| 2.0 * v + 1.0).collect();
        let basis = NuisanceBasis::from_design(vec!["a".into(), "b".into()], vec![a, b]);
        assert_eq!(basis.rank(), 1);
    }

    #[test]
    fn test_confound_signal_removed() {
        let nt = 60;
        let motion: Vec<f64> = (0..nt).map(|t| (t as f64 * 0.9).sin()).collect();
        let drift: Vec<f64> = (0..nt).map(|t| 0.05 * t as f64).collect();

        // Voxel 0 is pure motion + drift + offset; voxel 1 is an independent oscillation
        let signal: Vec<f64> = (0..nt).map(|t| (t as f64 * 0.23).cos()).collect();
        let mut data = vec![0.0; 2 * nt];
        for t in 0..nt {
            data[2 * t] = 3.0 * motion[t] + drift[t] + 10.0;
            data[2 * t + 1] = signal[t];
        }
        let vol = Volume::new(data, (2, 1, 1, nt), (1.0, 1.0, 1.0), scaled_affine((1.0, 1.0, 1.0), (0.0, 0.0, 0.0)), 2.0)
            .unwrap();

        let table = ConfoundTable::from_columns(vec![
            ("X".to_string(), column(motion)),
            ("GlobalSignal".to_string(), column(vec![5.0; nt])),
        ]).unwrap();

        let out = regress_out(&vol, &table, DEFAULT_COMPONENT_PREFIX, DEFAULT_MAX_COMPONENTS).unwrap();
        for v in out.voxel_series(0) {
            assert!(v.abs() < 1e-9, "Confound-driven voxel should vanish, got {}", v);
        }
        let kept = out.voxel_series(1);
        assert!(mean(&kept).abs() < 1e-9);
        assert!(std_dev(&kept) > 0.3, "Independent signal should survive");
    }

    #[test]
    fn test_missing_cells_as_zero() {
        let table = ConfoundTable::from_columns(vec![
            ("X".to_string(), vec![None, Some(1.0), Some(0.0), Some(1.0)]),
            ("a_comp_cor_00".to_string(), column(vec![0.0, 1.0, 0.0, 1.0])),
        ]).unwrap();
        let basis = NuisanceBasis::from_confounds(&table, DEFAULT_COMPONENT_PREFIX, DEFAULT_MAX_COMPONENTS);
        // X with its missing cell zeroed equals the component column
        assert_eq!(basis.columns, vec!["X", "a_comp_cor_00"]);
        assert_eq!(basis.rank(), 1);
    }

    #[test]
    fn test_timepoint_mismatch() {
        let vol = Volume::new(vec![0.0; 5], (1, 1, 1, 5), (1.0, 1.0, 1.0), scaled_affine((1.0, 1.0, 1.0), (0.0, 0.0, 0.0)), 2.0)
            .unwrap();
        let table = ConfoundTable::from_columns(vec![("X".to_string(), column(vec![0.0; 4]))]).unwrap();
        assert!(regress_out(&vol, &table, DEFAULT_COMPONENT_PREFIX, DEFAULT_MAX_COMPONENTS).is_err());
    }
}
