//! Motion scrubbing and repair of corrupted timepoints
//!
//! Timepoints whose framewise displacement exceeds the threshold are flagged
//! together with one frame before and two frames after (motion ringing).
//! Every voxel's flagged samples are then replaced by linear interpolation
//! across its unflagged samples.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::confounds::ConfoundTable;
use crate::error::Result;
use crate::signal::bracket;
use crate::volume::Volume;

/// Default framewise displacement threshold (mm)
pub const DEFAULT_FD_THRESHOLD: f64 = 0.2;

/// Frames flagged before a displacement spike
const WINDOW_BEFORE: usize = 1;
/// Frames flagged after a displacement spike
const WINDOW_AFTER: usize = 2;

/// Set of timepoints flagged as motion-corrupted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrubMask {
    flagged: BTreeSet<usize>,
    n_timepoints: usize,
}

impl ScrubMask {
    /// Flag spikes above `threshold` and expand each to `{i-1, i, i+1, i+2}`
    ///
    /// Indices are clipped to `0..n_timepoints`.
    pub fn from_displacement(fd: &[f64], threshold: f64, n_timepoints: usize) -> Self {
        let mut flagged = BTreeSet::new();
        for (i, &d) in fd.iter().enumerate() {
            if d > threshold {
                let lo = i.saturating_sub(WINDOW_BEFORE);
                let hi = (i + WINDOW_AFTER).min(n_timepoints.saturating_sub(1));
                flagged.extend(lo..=hi);
            }
        }
        flagged.retain(|&t| t < n_timepoints);
        Self { flagged, n_timepoints }
    }

    /// Build the mask from a confound table's framewise displacement
    pub fn from_confounds(confounds: &ConfoundTable, threshold: f64, n_timepoints: usize) -> Result<Self> {
        let fd = confounds.framewise_displacement()?;
        Ok(Self::from_displacement(&fd, threshold, n_timepoints))
    }

    /// Flagged timepoints, ascending
    pub fn flagged(&self) -> Vec<usize> {
        self.flagged.iter().copied().collect()
    }

    /// Unflagged timepoints, ascending
    pub fn retained(&self) -> Vec<usize> {
        (0..self.n_timepoints).filter(|t| !self.flagged.contains(t)).collect()
    }

    /// Whether timepoint `t` is flagged
    pub fn contains(&self, t: usize) -> bool {
        self.flagged.contains(&t)
    }

    /// Number of flagged timepoints
    pub fn len(&self) -> usize {
        self.flagged.len()
    }

    /// True when nothing was flagged
    pub fn is_empty(&self) -> bool {
        self.flagged.is_empty()
    }
}

/// Replace flagged timepoints by linear interpolation over retained ones
///
/// The interpolation anchors only depend on the mask, so each flagged frame
/// is a fixed weighted sum of two retained frames for every voxel. With fewer
/// than two retained frames the volume is returned unchanged.
pub fn repair(volume: &Volume, mask: &ScrubMask) -> Result<Volume> {
    if mask.is_empty() {
        debug!("No flagged timepoints, repair is a no-op");
        return Ok(volume.clone());
    }

    let good = mask.retained();
    if good.len() < 2 {
        warn!(
            "Only {} unflagged timepoints of {}, skipping repair",
            good.len(),
            volume.n_timepoints()
        );
        return Ok(volume.clone());
    }

    let n = volume.n_voxels();
    let mut data = volume.data().to_vec();

    for t in mask.flagged() {
        let (a, b) = bracket(&good, t);
        let (ta, tb) = (good[a], good[b]);
        let w = (t as f64 - ta as f64) / (tb as f64 - ta as f64);

        let src = volume.data();
        for v in 0..n {
            let ya = src[v + ta * n];
            let yb = src[v + tb * n];
            data[v + t * n] = ya + w * (yb - ya);
        }
    }

    info!("Repaired {} of {} timepoints", mask.len(), volume.n_timepoints());
    volume.with_data(data)
}
