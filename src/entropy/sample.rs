//! Sample entropy

use super::chebyshev;

/// Sample entropy - Richman & Moorman (2000)
///
/// Templates of length `order` and `order + 1` start at `0..N - order`, so
/// both counts run over the same set of unordered pairs `i < j`. A pair
/// matches when the Chebyshev distance is strictly below `r`.
///
/// # Arguments
/// * `x` - Time series (standardized in the feature bank)
/// * `order` - Embedding dimension m
/// * `r` - Tolerance
///
/// # Returns
/// `-ln(A / B)`, 0 when no length-m pair matches and `+inf` when length-m
/// pairs match but no length-(m+1) pair does.
pub fn sample_entropy(x: &[f64], order: usize, r: f64) -> f64 {
    let n = x.len();
    if n <= order + 1 {
        return 0.0;
    }
    let n_templates = n - order;

    let mut b = 0u64;
    let mut a = 0u64;
    for i in 0..n_templates {
        for j in (i + 1)..n_templates {
            let d = chebyshev(x, i, j, order);
            if d < r {
                b += 1;
                // Extending by one sample can only grow the distance
                if d.max((x[i + order] - x[j + order]).abs()) < r {
                    a += 1;
                }
            }
        }
    }

    if b == 0 {
        0.0
    } else if a == 0 {
        f64::INFINITY
    } else {
        (b as f64 / a as f64).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{tolerance, DEFAULT_ORDER, DEFAULT_R_RATIO};
    use crate::signal::zscore;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_periodic_series_is_zero() {
        let x = [0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let r = tolerance(&x, DEFAULT_R_RATIO);
        assert_eq!(sample_entropy(&x, DEFAULT_ORDER, r), 0.0);
    }

    #[test]
    fn test_constant_series_is_zero() {
        let x = vec![3.0; 50];
        assert_eq!(sample_entropy(&x, DEFAULT_ORDER, tolerance(&x, DEFAULT_R_RATIO)), 0.0);
    }

    #[test]
    fn test_no_longer_matches_is_infinite() {
        // Length-2 templates (0,0) at 0 and 2 match; their extensions 5 and 9 do not
        let x = [0.0, 0.0, 5.0, 0.0, 0.0, 9.0];
        assert_eq!(sample_entropy(&x, 2, 0.5), f64::INFINITY);
    }

    #[test]
    fn test_sine_more_regular_than_noise() {
        let mut sine: Vec<f64> = (0..300).map(|t| (t as f64 * 0.3).sin()).collect();
        zscore(&mut sine);

        let mut rng = StdRng::seed_from_u64(42);
        let mut noise: Vec<f64> = (0..300).map(|_| rng.gen::<f64>() - 0.5).collect();
        zscore(&mut noise);

        let se_sine = sample_entropy(&sine, DEFAULT_ORDER, tolerance(&sine, DEFAULT_R_RATIO));
        let se_noise = sample_entropy(&noise, DEFAULT_ORDER, tolerance(&noise, DEFAULT_R_RATIO));
        assert!(se_sine.is_finite() && se_noise.is_finite());
        assert!(se_sine < se_noise, "sine {} should be below noise {}", se_sine, se_noise);
    }
}
