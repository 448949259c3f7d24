// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Deterministic fixtures shared by the benchmarks.

fn lcg_next(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *state
}

fn unit(state: &mut u64) -> f64 {
    (lcg_next(state) >> 11) as f64 / (1u64 << 53) as f64
}

/// Piecewise-constant returns with uniform noise of half-width `noise`.
pub fn step_returns(
    n: usize,
    boundaries: &[usize],
    means: &[f64],
    noise: f64,
    seed: u64,
) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|t| {
            let segment = boundaries.partition_point(|&b| b <= t);
            let mean = means.get(segment).copied().unwrap_or_default();
            mean + noise * (2.0 * unit(&mut state) - 1.0)
        })
        .collect()
}

/// `chains` sequences of AR(1) draws with coefficient `phi`.
pub fn ar1_chains(chains: usize, draws: usize, phi: f64, seed: u64) -> Vec<Vec<f64>> {
    let mut state = seed;
    (0..chains)
        .map(|_| {
            let mut x = 0.0;
            (0..draws)
                .map(|_| {
                    x = phi * x + (2.0 * unit(&mut state) - 1.0);
                    x
                })
                .collect()
        })
        .collect()
}

/// Benchmark fixtures for bcpd.
pub fn crate_name() -> &'static str {
    "bcpd-bench"
}
