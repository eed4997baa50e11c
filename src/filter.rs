//! Butterworth frequency filtering
//!
//! Digital Butterworth low-, high- and band-pass designs in second-order
//! sections, applied forward and backward (zero phase) with odd-extension
//! padding and steady-state initial conditions.
//!
//! Designs go through the analog prototype: poles on the unit circle,
//! frequency transform to the requested band, then the bilinear transform
//! with pre-warped cutoffs (sampling frequency normalized to 2).

use std::f64::consts::PI;

use num_complex::Complex64;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::volume::Volume;

/// Default filter order
pub const DEFAULT_ORDER: usize = 5;
/// Default low-pass cutoff (Hz)
pub const DEFAULT_LOW_PASS: f64 = 0.08;
/// Default high-pass cutoff (Hz)
pub const DEFAULT_HIGH_PASS: f64 = 0.009;

/// Bilinear transform constant, 2 * fs with fs normalized to 2
const FS2: f64 = 4.0;

/// Second-order section coefficients
#[derive(Clone, Debug, PartialEq)]
pub struct SosSection {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a0=1, a1, a2]
    pub a: [f64; 3],
}

impl SosSection {
    /// Section from a numerator and a pair of digital poles
    ///
    /// The poles must be a conjugate pair or both real.
    fn from_poles(b: [f64; 3], z1: Complex64, z2: Complex64) -> Self {
        Self {
            b,
            a: [1.0, -(z1 + z2).re, (z1 * z2).re],
        }
    }

    /// First-order section stored with trailing zeros
    fn first_order(b: [f64; 2], z: Complex64) -> Self {
        Self {
            b: [b[0], b[1], 0.0],
            a: [1.0, -z.re, 0.0],
        }
    }

    /// DC gain sum(b) / sum(a)
    fn dc_gain(&self) -> f64 {
        let sa: f64 = self.a.iter().sum();
        if sa.abs() < f64::EPSILON {
            return 0.0;
        }
        self.b.iter().sum::<f64>() / sa
    }

    /// Scale the numerator by `k`
    fn scaled(mut self, k: f64) -> Self {
        for b in self.b.iter_mut() {
            *b *= k;
        }
        self
    }
}

//=============================================================================
// Design
//=============================================================================

/// Analog Butterworth prototype poles `-exp(i*pi*m/(2N))`, m = -N+1..N-1 step 2
///
/// Returned as (upper-half-plane poles of each conjugate pair, real pole if N is odd).
fn prototype_poles(order: usize) -> (Vec<Complex64>, Option<Complex64>) {
    let n = order as f64;
    let mut pairs = Vec::with_capacity(order / 2);
    // m runs N-1, N-3, ... > 0; each m and -m form a conjugate pair
    let mut m = order as i64 - 1;
    while m > 0 {
        let theta = PI * m as f64 / (2.0 * n);
        pairs.push(-Complex64::from_polar(1.0, theta));
        m -= 2;
    }
    let real = if order % 2 == 1 { Some(Complex64::new(-1.0, 0.0)) } else { None };
    (pairs, real)
}

/// Pre-warped analog frequency for a normalized digital cutoff
#[inline]
fn prewarp(wn: f64) -> f64 {
    FS2 * (PI * wn / 2.0).tan()
}

/// Map an analog pole to the z-plane
#[inline]
fn bilinear(p: Complex64) -> Complex64 {
    (FS2 + p) / (FS2 - p)
}

/// Digital gain `k * prod(FS2 - z) / prod(FS2 - p)` for analog zeros at the origin
fn digital_gain(k: f64, n_zeros_at_origin: usize, poles: &[Complex64]) -> f64 {
    let den = poles.iter().fold(Complex64::new(1.0, 0.0), |acc, &p| acc * (FS2 - p));
    let num = FS2.powi(n_zeros_at_origin as i32);
    (Complex64::new(k * num, 0.0) / den).re
}

fn lowpass_sections(order: usize, wn: f64) -> Vec<SosSection> {
    let wo = prewarp(wn);
    let (pairs, real) = prototype_poles(order);

    let mut analog = Vec::with_capacity(order);
    let mut sections = Vec::with_capacity(order.div_ceil(2));
    for p in pairs {
        let pa = p * wo;
        analog.push(pa);
        analog.push(pa.conj());
        let z = bilinear(pa);
        sections.push(SosSection::from_poles([1.0, 2.0, 1.0], z, z.conj()));
    }
    if let Some(p) = real {
        let pa = p * wo;
        analog.push(pa);
        sections.push(SosSection::first_order([1.0, 1.0], bilinear(pa)));
    }

    let k = digital_gain(wo.powi(order as i32), 0, &analog);
    apply_gain(sections, k)
}

fn highpass_sections(order: usize, wn: f64) -> Vec<SosSection> {
    let wo = prewarp(wn);
    let (pairs, real) = prototype_poles(order);

    let mut prototype = Vec::with_capacity(order);
    let mut analog = Vec::with_capacity(order);
    let mut sections = Vec::with_capacity(order.div_ceil(2));
    for p in pairs {
        prototype.push(p);
        prototype.push(p.conj());
        let pa = wo / p;
        analog.push(pa);
        analog.push(pa.conj());
        let z = bilinear(pa);
        sections.push(SosSection::from_poles([1.0, -2.0, 1.0], z, z.conj()));
    }
    if let Some(p) = real {
        prototype.push(p);
        let pa = wo / p;
        analog.push(pa);
        sections.push(SosSection::first_order([1.0, -1.0], bilinear(pa)));
    }

    // Prototype gain moved by the lp->hp transform: 1 / prod(-p)
    let k_hp = (Complex64::new(1.0, 0.0)
        / prototype.iter().fold(Complex64::new(1.0, 0.0), |acc, &p| acc * (-p)))
        .re;
    let k = digital_gain(k_hp, order, &analog);
    apply_gain(sections, k)
}

fn bandpass_sections(order: usize, wn_low: f64, wn_high: f64) -> Vec<SosSection> {
    let w1 = prewarp(wn_low);
    let w2 = prewarp(wn_high);
    let bw = w2 - w1;
    let wo2 = w1 * w2;
    let (pairs, real) = prototype_poles(order);

    // Each prototype pole p splits into the roots of s^2 - p*bw*s + wo^2
    let split = |p: Complex64| {
        let half = p * (bw / 2.0);
        let disc = (half * half - wo2).sqrt();
        (half + disc, half - disc)
    };

    let mut analog = Vec::with_capacity(2 * order);
    let mut sections = Vec::with_capacity(order);
    for p in pairs {
        let (pa, pb) = split(p);
        for q in [pa, pb] {
            analog.push(q);
            analog.push(q.conj());
            let z = bilinear(q);
            sections.push(SosSection::from_poles([1.0, 0.0, -1.0], z, z.conj()));
        }
    }
    if let Some(p) = real {
        let (pa, pb) = split(p);
        analog.push(pa);
        analog.push(pb);
        sections.push(SosSection::from_poles([1.0, 0.0, -1.0], bilinear(pa), bilinear(pb)));
    }

    let k = digital_gain(bw.powi(order as i32), order, &analog);
    apply_gain(sections, k)
}

/// Fold the overall gain into the first section
fn apply_gain(mut sections: Vec<SosSection>, k: f64) -> Vec<SosSection> {
    if let Some(first) = sections.first_mut() {
        *first = first.clone().scaled(k);
    }
    sections
}

/// Padding length used by the forward-backward pass
///
/// Three times the number of filter taps; trailing zero coefficients of
/// first-order sections do not count.
fn default_padlen(sections: &[SosSection]) -> usize {
    let zero_b = sections.iter().filter(|s| s.b[2] == 0.0).count();
    let zero_a = sections.iter().filter(|s| s.a[2] == 0.0).count();
    let ntaps = 2 * sections.len() + 1 - zero_b.min(zero_a);
    3 * ntaps
}

//=============================================================================
// Filtering
//=============================================================================

/// Steady-state section states for a unit step input
fn steady_state(sections: &[SosSection]) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sections.iter()
        .map(|s| {
            let g = s.dc_gain();
            let z2 = s.b[2] - s.a[2] * g;
            let z1 = s.b[1] + s.b[2] - (s.a[1] + s.a[2]) * g;
            let zi = [scale * z1, scale * z2];
            scale *= g;
            zi
        })
        .collect()
}

/// Run the cascade over `x` in place (transposed direct form II)
fn sosfilt(sections: &[SosSection], x: &mut [f64], state: &mut [[f64; 2]]) {
    for sample in x.iter_mut() {
        let mut cur = *sample;
        for (s, z) in sections.iter().zip(state.iter_mut()) {
            let y = s.b[0] * cur + z[0];
            z[0] = s.b[1] * cur - s.a[1] * y + z[1];
            z[1] = s.b[2] * cur - s.a[2] * y;
            cur = y;
        }
        *sample = cur;
    }
}

/// Zero-phase forward-backward filtering in place
///
/// # Arguments
/// * `sections` - Cascade of second-order sections
/// * `x` - Signal, overwritten with the filtered signal
/// * `padlen` - Odd-extension length on each side, clamped to `len - 1`
pub fn sosfiltfilt(sections: &[SosSection], x: &mut [f64], padlen: usize) {
    let n = x.len();
    if sections.is_empty() || n < 2 {
        return;
    }
    let edge = padlen.min(n - 1);

    // Odd extension: mirror about the end values
    let mut ext = Vec::with_capacity(n + 2 * edge);
    let (first, last) = (x[0], x[n - 1]);
    ext.extend((1..=edge).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(x);
    ext.extend((1..=edge).map(|i| 2.0 * last - x[n - 1 - i]));

    let zi = steady_state(sections);

    let x0 = ext[0];
    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * x0, z[1] * x0]).collect();
    sosfilt(sections, &mut ext, &mut state);

    ext.reverse();
    let y0 = ext[0];
    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * y0, z[1] * y0]).collect();
    sosfilt(sections, &mut ext, &mut state);
    ext.reverse();

    x.copy_from_slice(&ext[edge..edge + n]);
}

//=============================================================================
// Band-pass stage
//=============================================================================

/// A designed zero-phase Butterworth filter
#[derive(Clone, Debug)]
pub struct BandPass {
    sections: Vec<SosSection>,
    padlen: usize,
}

impl BandPass {
    /// Filter that leaves signals untouched
    pub fn passthrough() -> Self {
        Self { sections: Vec::new(), padlen: 0 }
    }

    /// Design the filter for data sampled every `tr` seconds
    ///
    /// A cutoff at or above Nyquist is dropped with a warning, leaving a
    /// one-sided design (or a passthrough when both are dropped).
    ///
    /// # Arguments
    /// * `order` - Butterworth order
    /// * `high_pass` - Lower edge of the pass band in Hz
    /// * `low_pass` - Upper edge of the pass band in Hz
    /// * `tr` - Sampling interval in seconds
    pub fn design(order: usize, high_pass: Option<f64>, low_pass: Option<f64>, tr: f64) -> Result<Self> {
        if order == 0 {
            return Err(PipelineError::Filter("order must be at least 1".to_string()));
        }
        if !(tr.is_finite() && tr > 0.0) {
            return Err(PipelineError::Filter(format!("invalid repetition time {}", tr)));
        }
        for (name, f) in [("high-pass", high_pass), ("low-pass", low_pass)] {
            if let Some(f) = f {
                if !(f.is_finite() && f > 0.0) {
                    return Err(PipelineError::Filter(format!("{} cutoff must be positive, got {}", name, f)));
                }
            }
        }
        if let (Some(hp), Some(lp)) = (high_pass, low_pass) {
            if hp >= lp {
                return Err(PipelineError::Filter(format!(
                    "high-pass cutoff {} Hz must be below low-pass cutoff {} Hz", hp, lp
                )));
            }
        }

        let nyquist = 0.5 / tr;
        let keep = |name: &str, f: Option<f64>| match f {
            Some(f) if f >= nyquist => {
                warn!("{} cutoff {} Hz is at or above Nyquist ({} Hz), skipping", name, f, nyquist);
                None
            }
            other => other.map(|f| f / nyquist),
        };
        let wn_high = keep("High-pass", high_pass);
        let wn_low = keep("Low-pass", low_pass);

        let sections = match (wn_high, wn_low) {
            (Some(h), Some(l)) => bandpass_sections(order, h, l),
            (None, Some(l)) => lowpass_sections(order, l),
            (Some(h), None) => highpass_sections(order, h),
            (None, None) => return Ok(Self::passthrough()),
        };
        let padlen = default_padlen(&sections);
        debug!("Butterworth design: {} sections, padlen {}", sections.len(), padlen);

        Ok(Self { sections, padlen })
    }

    /// Second-order sections of the design (empty for a passthrough)
    pub fn sections(&self) -> &[SosSection] {
        &self.sections
    }

    /// Padding length used on each side
    pub fn padlen(&self) -> usize {
        self.padlen
    }

    /// True when filtering is a no-op
    pub fn is_passthrough(&self) -> bool {
        self.sections.is_empty()
    }

    /// Filter one series in place
    pub fn apply(&self, x: &mut [f64]) {
        sosfiltfilt(&self.sections, x, self.padlen);
    }
}

/// Band-pass every voxel's time series
pub fn bandpass_volume(volume: &Volume, filter: &BandPass) -> Result<Volume> {
    if filter.is_passthrough() {
        return Ok(volume.clone());
    }
    info!(
        "Filtering {} voxels x {} timepoints ({} sections)",
        volume.n_voxels(),
        volume.n_timepoints(),
        filter.sections().len()
    );
    volume.map_voxel_series(|series| filter.apply(series))
}
