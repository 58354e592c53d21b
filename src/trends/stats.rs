//! Shared statistics helpers.

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty
/// input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the Bessel-corrected sample standard deviation (`n - 1` divisor)
/// given a pre-computed mean. Returns 0.0 when fewer than two values exist;
/// callers enforce their own sample floors before trusting the result.
pub fn sample_stdev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_empty() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_mean_basic() {
        assert_eq!(mean(&[2.0, 4.0]), 3.0);
        assert_eq!(mean(&[-3.0, -3.0, -3.0]), -3.0);
    }

    #[test]
    fn test_sample_stdev_uses_n_minus_one() {
        let values = [2.0, 4.0];
        let m = mean(&values);
        // Sample variance of [2, 4] is 2, not 1.
        assert!((sample_stdev(&values, m) - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_sample_stdev_known_value() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        assert_eq!(m, 5.0);
        let expected = (32.0_f64 / 7.0).sqrt();
        assert!((sample_stdev(&values, m) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_sample_stdev_of_constant_values_is_zero() {
        let values = [1.5, 1.5, 1.5];
        assert_eq!(sample_stdev(&values, mean(&values)), 0.0);
    }

    #[test]
    fn test_sample_stdev_underflow_guard() {
        assert_eq!(sample_stdev(&[], 0.0), 0.0);
        assert_eq!(sample_stdev(&[7.0], 7.0), 0.0);
    }
}
