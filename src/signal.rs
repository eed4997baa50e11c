//! One-dimensional signal helpers shared by the pipeline stages
//!
//! All standard deviations are population estimates (ddof = 0), which is
//! what the entropy tolerances and the z-scoring were fit against.

/// Values below this are treated as zero variance
pub const VARIANCE_EPS: f64 = f64::EPSILON;

/// Arithmetic mean (0 for an empty slice)
pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// True when every sample equals the first (vacuously true when empty)
pub fn is_constant(x: &[f64]) -> bool {
    x.iter().all(|&v| v == x[0])
}

/// Population standard deviation; exactly 0 for a constant series
pub fn std_dev(x: &[f64]) -> f64 {
    if is_constant(x) {
        return 0.0;
    }
    let m = mean(x);
    let var = x.iter().map(|&v| (v - m) * (v - m)).sum::<f64>() / x.len() as f64;
    var.sqrt()
}

/// Remove the mean and the least-squares linear trend in-place
pub fn detrend_linear(x: &mut [f64]) {
    let n = x.len();
    if n == 0 {
        return;
    }

    let m = mean(x);
    for v in x.iter_mut() {
        *v -= m;
    }
    if n < 2 {
        return;
    }

    // Centered, unit-norm ramp; projecting onto it removes the slope
    let t_mean = (n - 1) as f64 / 2.0;
    let norm: f64 = (0..n).map(|t| (t as f64 - t_mean).powi(2)).sum::<f64>().sqrt();
    if norm < VARIANCE_EPS {
        return;
    }

    let dot: f64 = x.iter().enumerate()
        .map(|(t, &v)| (t as f64 - t_mean) / norm * v)
        .sum();
    for (t, v) in x.iter_mut().enumerate() {
        *v -= dot * (t as f64 - t_mean) / norm;
    }
}

/// Z-score in-place; zero-variance series become all zeros
pub fn zscore(x: &mut [f64]) {
    if is_constant(x) {
        x.fill(0.0);
        return;
    }
    let m = mean(x);
    let mut s = std_dev(x);
    if s == 0.0 {
        s = 1.0;
    }
    for v in x.iter_mut() {
        *v = (*v - m) / s;
    }
}

/// Linear interpolation at `t` from samples `ys` located at sorted `xs`
///
/// Outside the anchor range the first or last segment is extended
/// (linear extrapolation). Requires at least two anchors.
pub fn interp_linear(xs: &[usize], ys: &[f64], t: usize) -> f64 {
    let (a, b) = bracket(xs, t);
    let (xa, xb) = (xs[a] as f64, xs[b] as f64);
    let w = (t as f64 - xa) / (xb - xa);
    ys[a] + w * (ys[b] - ys[a])
}

/// Indices of the anchor segment used to interpolate at `t`
///
/// Returns the pair of neighbouring anchors around `t`, or the first/last
/// pair when `t` lies outside the anchors. `xs` must be sorted, unique and
/// hold at least two entries.
pub fn bracket(xs: &[usize], t: usize) -> (usize, usize) {
    let pos = xs.partition_point(|&x| x < t);
    if pos == 0 {
        (0, 1)
    } else if pos >= xs.len() {
        (xs.len() - 2, xs.len() - 1)
    } else {
        (pos - 1, pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_std_population() {
        let x = [1.0, -1.0, 1.0, -1.0];
        assert_relative_eq!(std_dev(&x), 1.0, epsilon = 1e-12);
        assert_eq!(std_dev(&[]), 0.0);
    }

    #[test]
    fn test_detrend_removes_ramp() {
        let mut x: Vec<f64> = (0..20).map(|t| 3.0 + 0.5 * t as f64).collect();
        detrend_linear(&mut x);
        for &v in &x {
            assert!(v.abs() < 1e-10, "Ramp should vanish, got {}", v);
        }
    }

    #[test]
    fn test_detrend_keeps_oscillation() {
        let mut x: Vec<f64> = (0..8).map(|t| if t % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let before = x.clone();
        detrend_linear(&mut x);
        // Alternating signal has a tiny slope component, nothing else
        for (a, b) in x.iter().zip(before.iter()) {
            assert!((a - b).abs() < 0.35);
        }
        assert_relative_eq!(mean(&x), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zscore_constant_is_zero() {
        let mut x = vec![4.2; 10];
        zscore(&mut x);
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_std_of_inexact_constant_is_zero() {
        assert_eq!(std_dev(&[4.2; 50]), 0.0);
        assert_eq!(std_dev(&[0.1; 7]), 0.0);
        assert!(is_constant(&[]));
        assert!(!is_constant(&[4.2, 4.2, 4.200000000000001]));
    }

    #[test]
    fn test_zscore_inexact_constant_is_zero() {
        let mut x = vec![4.2; 50];
        zscore(&mut x);
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_zscore_unit_variance() {
        let mut x: Vec<f64> = (0..50).map(|t| (t as f64 * 0.3).sin() * 7.0 + 2.0).collect();
        zscore(&mut x);
        assert_relative_eq!(mean(&x), 0.0, epsilon = 1e-12);
        assert_relative_eq!(std_dev(&x), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_interp_and_extrapolate() {
        let xs = [1, 3, 6];
        let ys = [2.0, 6.0, 3.0];
        assert_relative_eq!(interp_linear(&xs, &ys, 2), 4.0);
        assert_relative_eq!(interp_linear(&xs, &ys, 4), 5.0);
        // Left extrapolation follows the first segment
        assert_relative_eq!(interp_linear(&xs, &ys, 0), 0.0);
        // Right extrapolation follows the last segment
        assert_relative_eq!(interp_linear(&xs, &ys, 7), 2.0);
    }
}
