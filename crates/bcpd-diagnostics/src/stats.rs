// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Rank-normalized split R-hat and Geyer initial-monotone-sequence ESS.
//!
//! Inputs are per-chain draw vectors of equal length. Every function returns
//! `NaN` when the statistic is undefined (too few draws, zero variance,
//! non-finite draws).

use bcpd_core::numeric::{median, quantile_sorted};
use statrs::distribution::{ContinuousCDF, Normal};

const MIN_DRAWS: usize = 4;

fn is_valid(chains: &[Vec<f64>]) -> bool {
    let Some(first) = chains.first() else {
        return false;
    };
    first.len() >= MIN_DRAWS
        && chains.iter().all(|c| c.len() == first.len())
        && chains.iter().flatten().all(|v| v.is_finite())
}

/// Splits each chain into its first and last halves (dropping the middle draw
/// of odd-length chains).
pub fn split_chains(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut out = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let half = chain.len() / 2;
        out.push(chain[..half].to_vec());
        out.push(chain[chain.len() - half..].to_vec());
    }
    out
}

/// Fractional ranks (1-based, ties averaged) of all draws pooled together,
/// mapped through the standard normal quantile function.
pub fn z_scale(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let pooled: Vec<f64> = chains.iter().flatten().copied().collect();
    let size = pooled.len();
    let mut order: Vec<usize> = (0..size).collect();
    order.sort_by(|&a, &b| pooled[a].total_cmp(&pooled[b]));

    let mut ranks = vec![0.0; size];
    let mut start = 0;
    while start < size {
        let mut end = start + 1;
        while end < size && pooled[order[end]] == pooled[order[start]] {
            end += 1;
        }
        let average = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = average;
        }
        start = end;
    }

    let standard = match Normal::new(0.0, 1.0) {
        Ok(normal) => normal,
        Err(_) => return chains.iter().map(|c| vec![f64::NAN; c.len()]).collect(),
    };
    let mut z = ranks
        .into_iter()
        .map(|r| standard.inverse_cdf((r - 0.375) / (size as f64 + 0.25)));
    chains
        .iter()
        .map(|c| c.iter().map(|_| z.next().unwrap_or(f64::NAN)).collect())
        .collect()
}

fn chain_mean(chain: &[f64]) -> f64 {
    chain.iter().sum::<f64>() / chain.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    let m = chain_mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64
}

/// Classic potential scale reduction over the given chains.
pub fn rhat_basic(chains: &[Vec<f64>]) -> f64 {
    if chains.len() < 2 || chains[0].len() < 2 {
        return f64::NAN;
    }
    let n = chains[0].len() as f64;
    let means: Vec<f64> = chains.iter().map(|c| chain_mean(c)).collect();
    let between = n * sample_variance(&means);
    let within = chains.iter().map(|c| sample_variance(c)).sum::<f64>() / chains.len() as f64;
    ((between / within + n - 1.0) / n).sqrt()
}

/// Rank-normalized split R-hat: the larger of the bulk and folded (tail) values.
pub fn rhat(chains: &[Vec<f64>]) -> f64 {
    if !is_valid(chains) {
        return f64::NAN;
    }
    let split = split_chains(chains);
    let bulk = rhat_basic(&z_scale(&split));

    let pooled: Vec<f64> = split.iter().flatten().copied().collect();
    let Some(center) = median(&pooled) else {
        return f64::NAN;
    };
    let folded: Vec<Vec<f64>> = split
        .iter()
        .map(|c| c.iter().map(|v| (v - center).abs()).collect())
        .collect();
    let tail = rhat_basic(&z_scale(&folded));
    if bulk.is_nan() || tail.is_nan() {
        return f64::NAN;
    }
    bulk.max(tail)
}

fn autocovariance(chain: &[f64], mean: f64, lag: usize) -> f64 {
    let n = chain.len();
    chain[..n - lag]
        .iter()
        .zip(&chain[lag..])
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum::<f64>()
        / n as f64
}

/// Effective sample size of the given chains (no splitting or ranking).
pub fn ess_basic(chains: &[Vec<f64>]) -> f64 {
    let n_chain = chains.len();
    if n_chain == 0 || chains[0].len() < MIN_DRAWS {
        return f64::NAN;
    }
    let n_draw = chains[0].len();
    let means: Vec<f64> = chains.iter().map(|c| chain_mean(c)).collect();
    let mean_acov = |lag: usize| -> f64 {
        chains
            .iter()
            .zip(&means)
            .map(|(c, &m)| autocovariance(c, m, lag))
            .sum::<f64>()
            / n_chain as f64
    };

    let n = n_draw as f64;
    let mean_var = mean_acov(0) * n / (n - 1.0);
    let mut var_plus = mean_var * (n - 1.0) / n;
    if n_chain > 1 {
        var_plus += sample_variance(&means);
    }
    if !(var_plus.is_finite() && var_plus > 0.0) {
        return f64::NAN;
    }

    let mut rho = vec![0.0; n_draw];
    rho[0] = 1.0;
    let mut rho_even = 1.0;
    let mut rho_odd = 1.0 - (mean_var - mean_acov(1)) / var_plus;
    rho[1] = rho_odd;

    let mut t = 1;
    while t < n_draw - 3 && rho_even + rho_odd > 0.0 {
        rho_even = 1.0 - (mean_var - mean_acov(t + 1)) / var_plus;
        rho_odd = 1.0 - (mean_var - mean_acov(t + 2)) / var_plus;
        if rho_even + rho_odd >= 0.0 {
            rho[t + 1] = rho_even;
            rho[t + 2] = rho_odd;
        }
        t += 2;
    }

    let total = (n_chain * n_draw) as f64;
    // No pair was accepted: the sum collapses to rho[0] alone.
    let tau = if t < 3 {
        0.0
    } else {
        let max_t = t - 2;
        if rho_even > 0.0 {
            rho[max_t + 1] = rho_even;
        }

        // Initial monotone sequence.
        let mut t = 1;
        while t + 2 <= max_t {
            let previous = rho[t - 1] + rho[t];
            if rho[t + 1] + rho[t + 2] > previous {
                rho[t + 1] = previous / 2.0;
                rho[t + 2] = rho[t + 1];
            }
            t += 2;
        }
        -1.0 + 2.0 * rho[..=max_t].iter().sum::<f64>() + rho[max_t + 1]
    };
    let tau = tau.max(1.0 / total.log10());
    total / tau
}

/// Bulk ESS: ESS of rank-normalized split chains.
pub fn ess_bulk(chains: &[Vec<f64>]) -> f64 {
    if !is_valid(chains) {
        return f64::NAN;
    }
    ess_basic(&z_scale(&split_chains(chains)))
}

/// ESS of the split chains without rank normalization.
pub fn ess_mean(chains: &[Vec<f64>]) -> f64 {
    if !is_valid(chains) {
        return f64::NAN;
    }
    ess_basic(&split_chains(chains))
}

fn ess_quantile(chains: &[Vec<f64>], prob: f64) -> f64 {
    let mut pooled: Vec<f64> = chains.iter().flatten().copied().collect();
    pooled.sort_by(f64::total_cmp);
    let Some(cut) = quantile_sorted(&pooled, prob) else {
        return f64::NAN;
    };
    let indicator: Vec<Vec<f64>> = chains
        .iter()
        .map(|c| c.iter().map(|&v| if v <= cut { 1.0 } else { 0.0 }).collect())
        .collect();
    ess_basic(&split_chains(&indicator))
}

/// Tail ESS: the smaller ESS of the 5% and 95% quantile indicators.
pub fn ess_tail(chains: &[Vec<f64>]) -> f64 {
    if !is_valid(chains) {
        return f64::NAN;
    }
    let low = ess_quantile(chains, 0.05);
    let high = ess_quantile(chains, 0.95);
    if low.is_nan() || high.is_nan() {
        return f64::NAN;
    }
    low.min(high)
}

/// ESS for the standard deviation: the smaller of the ESS of the draws and
/// of their squares.
pub fn ess_sd(chains: &[Vec<f64>]) -> f64 {
    if !is_valid(chains) {
        return f64::NAN;
    }
    let squared: Vec<Vec<f64>> = chains
        .iter()
        .map(|c| c.iter().map(|v| v * v).collect())
        .collect();
    let a = ess_mean(chains);
    let b = ess_mean(&squared);
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    a.min(b)
}

/// Monte Carlo standard error of the mean.
pub fn mcse_mean(sd: f64, ess_mean: f64) -> f64 {
    sd / ess_mean.sqrt()
}

/// Monte Carlo standard error of the standard deviation.
pub fn mcse_sd(sd: f64, ess_sd: f64) -> f64 {
    let factor = (std::f64::consts::E * (1.0 - 1.0 / ess_sd).powf(ess_sd - 1.0) - 1.0).sqrt();
    sd * factor
}

#[cfg(test)]
mod tests {
    use super::{ess_bulk, ess_mean, ess_sd, ess_tail, mcse_sd, rhat, split_chains, z_scale};
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn iid_chains(n_chains: usize, len: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        (0..n_chains)
            .map(|_| (0..len).map(|_| StandardNormal.sample(&mut rng)).collect())
            .collect()
    }

    #[test]
    fn split_drops_middle_of_odd_chains() {
        let split = split_chains(&[vec![1.0, 2.0, 3.0, 4.0, 5.0]]);
        assert_eq!(split, vec![vec![1.0, 2.0], vec![4.0, 5.0]]);
    }

    #[test]
    fn z_scale_preserves_order_and_averages_ties() {
        let z = z_scale(&[vec![3.0, 1.0, 2.0, 2.0]]);
        let row = &z[0];
        assert!(row[1] < row[2]);
        assert_eq!(row[2], row[3]);
        assert!(row[3] < row[0]);
        assert!(row[2].abs() < 1e-9);
    }

    #[test]
    fn independent_chains_pass_default_thresholds() {
        let chains = iid_chains(4, 400, 7);
        let r = rhat(&chains);
        assert!(r < 1.01, "rhat={r}");
        assert!(ess_bulk(&chains) > 400.0);
        assert!(ess_tail(&chains) > 400.0);
        assert!(ess_mean(&chains) > 400.0);
        assert!(ess_sd(&chains) > 400.0);
    }

    #[test]
    fn autocorrelated_chain_has_reduced_ess() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let chains: Vec<Vec<f64>> = (0..2)
            .map(|_| {
                let mut x = 0.0;
                (0..1000)
                    .map(|_| {
                        let e: f64 = StandardNormal.sample(&mut rng);
                        x = 0.95 * x + e;
                        x
                    })
                    .collect()
            })
            .collect();
        let ess = ess_mean(&chains);
        assert!(ess < 300.0, "ess={ess}");
        assert!(ess > 5.0, "ess={ess}");
    }

    #[test]
    fn shifted_chains_are_flagged() {
        let chains: Vec<Vec<f64>> = iid_chains(4, 200, 11)
            .into_iter()
            .enumerate()
            .map(|(c, chain)| chain.into_iter().map(|v| v + c as f64 * 3.0).collect())
            .collect();
        assert!(rhat(&chains) > 1.5);
    }

    #[test]
    fn constant_and_short_chains_are_undefined() {
        let constant = vec![vec![2.0; 50], vec![2.0; 50]];
        assert!(rhat(&constant).is_nan());
        assert!(ess_bulk(&constant).is_nan());
        assert!(ess_mean(&constant).is_nan());
        assert!(rhat(&[vec![1.0, 2.0, 3.0]]).is_nan());
    }

    #[test]
    fn mcse_sd_shrinks_with_ess() {
        assert!(mcse_sd(1.0, 1000.0) < mcse_sd(1.0, 50.0));
        assert!((mcse_sd(1.0, 1e6) - (1.0 / (2.0 * 1e6f64)).sqrt()).abs() < 1e-4);
    }
}
