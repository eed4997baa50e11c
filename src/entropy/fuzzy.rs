//! Fuzzy entropy

use super::chebyshev;

/// Mean exponential membership over all ordered template pairs of length `dim`
///
/// Self-pairs are included, each contributing `exp(0) = 1`.
fn phi(x: &[f64], dim: usize, r: f64, exponent: i32) -> f64 {
    if x.len() < dim {
        return 0.0;
    }
    let n = x.len() - dim + 1;
    if n <= 1 {
        return 0.0;
    }

    let mut total = 0.0;
    for i in 0..n {
        for j in 0..n {
            let d = chebyshev(x, i, j, dim);
            total += (-d.powi(exponent) / r).exp();
        }
    }
    total / (n * n) as f64
}

/// Fuzzy entropy - Chen et al. (2007), exponential membership
///
/// # Arguments
/// * `x` - Time series (raw variant in the feature bank)
/// * `order` - Embedding dimension m
/// * `r` - Tolerance; the membership is `exp(-d^n / r)`
/// * `exponent` - Membership exponent n
///
/// # Returns
/// `-ln(phi(m+1) / phi(m))`, or 0 when `r` is 0 or either phi is 0
pub fn fuzzy_entropy(x: &[f64], order: usize, r: f64, exponent: i32) -> f64 {
    if r == 0.0 {
        return 0.0;
    }
    let phi_m = phi(x, order, r, exponent);
    let phi_m1 = phi(x, order + 1, r, exponent);
    if phi_m == 0.0 || phi_m1 == 0.0 {
        return 0.0;
    }
    // ln(phi_m / phi_m1) keeps equal phis at +0
    (phi_m / phi_m1).ln()
}
