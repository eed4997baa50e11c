//! Entropy estimators for region time series
//!
//! Four independent pure functions over `&[f64]`. Every standard deviation
//! is a population estimate (ddof = 0). Degenerate inputs (constant or too
//! short series) return a fixed value instead of failing.
//!
//! # Modules
//! - `sample`: Sample entropy (template matching, Chebyshev distance)
//! - `differential`: Gaussian differential entropy
//! - `fuzzy`: Fuzzy entropy with exponential membership
//! - `range`: Range entropy with the max-min range distance

pub mod differential;
pub mod fuzzy;
pub mod range;
pub mod sample;

pub use differential::differential_entropy;
pub use fuzzy::fuzzy_entropy;
pub use range::range_entropy;
pub use sample::sample_entropy;

use crate::signal::std_dev;

/// Embedding dimension used for every template-based estimator
pub const DEFAULT_ORDER: usize = 2;

/// Tolerance as a fraction of the series' standard deviation
pub const DEFAULT_R_RATIO: f64 = 0.2;

/// Membership exponent of fuzzy entropy
pub const DEFAULT_FUZZY_EXPONENT: i32 = 2;

/// Similarity tolerance `ratio * std(x)`
#[inline]
pub fn tolerance(x: &[f64], ratio: f64) -> f64 {
    ratio * std_dev(x)
}

/// Chebyshev distance between the length-`len` templates starting at `i` and `j`
#[inline]
pub(crate) fn chebyshev(x: &[f64], i: usize, j: usize, len: usize) -> f64 {
    x[i..i + len].iter()
        .zip(x[j..j + len].iter())
        .fold(0.0, |acc: f64, (a, b)| acc.max((a - b).abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chebyshev() {
        let x = [0.0, 1.0, 3.0, 2.0, 2.5];
        assert_eq!(chebyshev(&x, 0, 2, 2), 3.0);
        assert_eq!(chebyshev(&x, 1, 3, 2), 1.0);
        assert_eq!(chebyshev(&x, 1, 1, 3), 0.0);
    }

    #[test]
    fn test_tolerance_population_std() {
        assert!((tolerance(&[1.0, -1.0, 1.0, -1.0], DEFAULT_R_RATIO) - 0.2).abs() < 1e-12);
    }
}
