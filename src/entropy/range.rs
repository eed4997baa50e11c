//! Range entropy

/// Range distance: max |delta| - min |delta| over the template positions
#[inline]
fn range_distance(x: &[f64], i: usize, j: usize, len: usize) -> f64 {
    let (lo, hi) = x[i..i + len].iter()
        .zip(x[j..j + len].iter())
        .map(|(a, b)| (a - b).abs())
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), d| (lo.min(d), hi.max(d)));
    hi - lo
}

/// Unordered template pairs of length `dim` closer than `r`
fn count_similar(x: &[f64], dim: usize, r: f64) -> u64 {
    if x.len() < dim {
        return 0;
    }
    let n = x.len() - dim + 1;
    let mut count = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            if range_distance(x, i, j, dim) < r {
                count += 1;
            }
        }
    }
    count
}

/// Range entropy - Omidvarnia et al. (2018)
///
/// Length-m templates (`N - m + 1` of them) give B, length-(m+1) templates
/// (`N - m`) give A.
///
/// # Arguments
/// * `x` - Time series (raw variant in the feature bank)
/// * `order` - Embedding dimension m
/// * `r` - Tolerance
///
/// # Returns
/// `-ln(A / B)`, or 0 when `r`, A or B is 0
pub fn range_entropy(x: &[f64], order: usize, r: f64) -> f64 {
    if r == 0.0 {
        return 0.0;
    }
    let b = count_similar(x, order, r);
    let a = count_similar(x, order + 1, r);
    if a == 0 || b == 0 {
        return 0.0;
    }
    (b as f64 / a as f64).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{tolerance, DEFAULT_ORDER, DEFAULT_R_RATIO};
    use approx::assert_relative_eq;

    #[test]
    fn test_range_distance() {
        let x = [0.0, 1.0, 4.0, 2.0];
        // |0-4|, |1-2| -> 4 - 1
        assert_eq!(range_distance(&x, 0, 2, 2), 3.0);
        assert_eq!(range_distance(&x, 1, 1, 2), 0.0);
    }

    #[test]
    fn test_period_two_hand_computed() {
        // Every pair has equal |delta| at all positions, so every pair matches
        let x = [0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let r = tolerance(&x, DEFAULT_R_RATIO);
        assert_eq!(count_similar(&x, 2, r), 21);
        assert_eq!(count_similar(&x, 3, r), 15);
        assert_relative_eq!(range_entropy(&x, DEFAULT_ORDER, r), (21.0_f64 / 15.0).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_constant_is_zero() {
        let x = vec![-1.5; 25];
        assert_eq!(range_entropy(&x, DEFAULT_ORDER, tolerance(&x, DEFAULT_R_RATIO)), 0.0);
    }

    #[test]
    fn test_inexact_constant_is_zero() {
        let x = vec![4.2; 50];
        let re = range_entropy(&x, DEFAULT_ORDER, tolerance(&x, DEFAULT_R_RATIO));
        assert_eq!(re, 0.0);
        assert!(re.is_sign_positive());
    }
}
