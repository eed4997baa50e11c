//! Differential entropy under a Gaussian assumption

use std::f64::consts::{E, PI};

use crate::signal::std_dev;

/// `0.5 * ln(2 * pi * e * sigma^2)` with population sigma
///
/// A constant series returns exactly 0 rather than `-inf`.
pub fn differential_entropy(x: &[f64]) -> f64 {
    let sigma = std_dev(x);
    if sigma == 0.0 {
        return 0.0;
    }
    0.5 * (2.0 * PI * E * sigma * sigma).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unit_variance() {
        let x = [1.0, -1.0, 1.0, -1.0];
        assert_relative_eq!(differential_entropy(&x), 0.5 * (2.0 * PI * E).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_constant_is_zero() {
        assert_eq!(differential_entropy(&[4.0; 20]), 0.0);
        assert_eq!(differential_entropy(&[]), 0.0);
    }

    #[test]
    fn test_inexact_constant_is_zero() {
        assert_eq!(differential_entropy(&[4.2; 50]), 0.0);
        assert_eq!(differential_entropy(&[0.1; 9]), 0.0);
    }

    #[test]
    fn test_scaling_shifts_by_log() {
        let x: Vec<f64> = (0..64).map(|t| (t as f64 * 0.4).cos()).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v).collect();
        assert_relative_eq!(differential_entropy(&y) - differential_entropy(&x), 3.0_f64.ln(), epsilon = 1e-12);
    }
}
