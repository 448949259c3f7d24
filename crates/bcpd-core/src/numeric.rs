// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::BcpdError;

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Variance with `ddof` delta degrees of freedom; `None` when `len <= ddof`.
pub fn variance(values: &[f64], ddof: usize) -> Option<f64> {
    if values.len() <= ddof {
        return None;
    }
    let m = mean(values)?;
    let ss = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>();
    Some(ss / (values.len() - ddof) as f64)
}

/// Population standard deviation (ddof = 0).
pub fn std_population(values: &[f64]) -> Option<f64> {
    variance(values, 0).map(f64::sqrt)
}

/// Sample standard deviation (ddof = 1).
pub fn std_sample(values: &[f64]) -> Option<f64> {
    variance(values, 1).map(f64::sqrt)
}

/// Logistic sigmoid evaluated without overflow for large |x|.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + exp(x))` without overflow.
pub fn log1p_exp(x: f64) -> f64 {
    if x > 35.0 {
        x
    } else if x < -35.0 {
        x.exp()
    } else {
        x.exp().ln_1p()
    }
}

/// Median of an unsorted slice (average of the two middle values for even lengths).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

/// Quantile of an ascending-sorted slice with linear interpolation between
/// order statistics; `None` for an empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Highest-density interval: the narrowest window of sorted draws holding
/// `floor(prob * n)` draws beyond its lower end.
///
/// `prob` must lie in `(0, 1]`; draws must be finite and non-empty.
pub fn hdi(samples: &[f64], prob: f64) -> Result<(f64, f64), BcpdError> {
    if !(prob.is_finite() && prob > 0.0 && prob <= 1.0) {
        return Err(BcpdError::config(format!(
            "hdi probability must be in (0, 1]; got {prob}"
        )));
    }
    if samples.is_empty() {
        return Err(BcpdError::insufficient_data(
            "hdi requires at least one sample",
        ));
    }
    if samples.iter().any(|v| !v.is_finite()) {
        return Err(BcpdError::invalid_input("hdi samples must be finite"));
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let inc = ((prob * n as f64).floor() as usize).min(n - 1);
    let n_intervals = n - inc;

    let mut best = 0;
    let mut best_width = f64::INFINITY;
    for i in 0..n_intervals {
        let width = sorted[i + inc] - sorted[i];
        if width < best_width {
            best_width = width;
            best = i;
        }
    }
    Ok((sorted[best], sorted[best + inc]))
}

#[cfg(test)]
mod tests {
    use super::{
        hdi, log1p_exp, mean, median, quantile_sorted, sigmoid, std_population, std_sample,
        variance,
    };

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn moments_match_hand_computed_values() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_close(mean(&values).expect("mean"), 5.0, 1e-12);
        assert_close(std_population(&values).expect("std"), 2.0, 1e-12);
        assert_close(variance(&values, 1).expect("var"), 32.0 / 7.0, 1e-12);
        assert!(std_sample(&[1.0]).is_none());
        assert!(mean(&[]).is_none());
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_close(sigmoid(0.0), 0.5, 1e-15);
        assert_eq!(sigmoid(1_000.0), 1.0);
        assert_eq!(sigmoid(-1_000.0), 0.0);
        assert!(log1p_exp(1_000.0).is_finite());
        assert_close(log1p_exp(0.0), std::f64::consts::LN_2, 1e-15);
    }

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_sorted(&sorted, 0.5), Some(3.0));
        assert_close(quantile_sorted(&sorted, 0.05).expect("q"), 1.2, 1e-12);
        assert_eq!(quantile_sorted(&sorted, 1.0), Some(5.0));
        assert_eq!(quantile_sorted(&[], 0.5), None);
    }

    #[test]
    fn hdi_picks_the_narrowest_window() {
        // Dense cluster near 10 with a long right tail.
        let mut samples: Vec<f64> = (0..90).map(|i| 10.0 + (i as f64) * 0.01).collect();
        samples.extend((0..10).map(|i| 50.0 + i as f64 * 10.0));
        let (lo, hi) = hdi(&samples, 0.9).expect("hdi");
        assert_close(lo, 10.0, 1e-12);
        assert_close(hi, 50.0, 1e-12);
        let (lo, hi) = hdi(&samples, 0.5).expect("hdi");
        assert!(lo >= 10.0 && hi <= 10.9);
    }

    #[test]
    fn hdi_edge_cases() {
        assert_eq!(hdi(&[4.0], 0.95).expect("single"), (4.0, 4.0));
        assert_eq!(hdi(&[3.0, 1.0, 2.0], 1.0).expect("full"), (1.0, 3.0));
        assert_eq!(hdi(&[], 0.9).expect_err("empty").code(), "insufficient_data");
        assert_eq!(hdi(&[1.0], 0.0).expect_err("prob").code(), "config_error");
        assert_eq!(
            hdi(&[1.0, f64::NAN], 0.5).expect_err("nan").code(),
            "invalid_input"
        );
    }
}
