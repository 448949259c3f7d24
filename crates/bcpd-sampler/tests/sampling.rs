// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_core::{CancelToken, ExecutionContext, ProgressSink};
use bcpd_model::{
    GenerativeModel, ModelKind, MultipleChangePointModel, MultiplePriors, SamplerSettings,
    SingleChangePointModel, SinglePriors,
};
use bcpd_sampler::{SamplerKernel, sample};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Mutex;

/// Independent standard normals; differentiable unless `gradient` is false.
struct StdNormal {
    dim: usize,
    gradient: bool,
}

impl GenerativeModel for StdNormal {
    fn kind(&self) -> ModelKind {
        ModelKind::Single
    }

    fn n_obs(&self) -> usize {
        0
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        -0.5 * theta.iter().map(|x| x * x).sum::<f64>()
    }

    fn supports_gradient(&self) -> bool {
        self.gradient
    }

    fn log_density_gradient(&self, theta: &[f64], grad: &mut [f64]) -> Option<f64> {
        if !self.gradient {
            return None;
        }
        for (g, x) in grad.iter_mut().zip(theta) {
            *g = -x;
        }
        Some(self.log_density(theta))
    }

    fn initial_point(&self) -> Vec<f64> {
        vec![0.5; self.dim]
    }

    fn initial_scales(&self) -> Vec<f64> {
        vec![1.0; self.dim]
    }

    fn parameter_names(&self) -> Vec<String> {
        (0..self.dim).map(|i| format!("x[{i}]")).collect()
    }

    fn constrain(&self, theta: &[f64]) -> Vec<f64> {
        theta.to_vec()
    }
}

fn settings(draws: usize, tune: usize, chains: usize, seed: u64) -> SamplerSettings {
    SamplerSettings {
        draws,
        tune,
        chains,
        target_accept: 0.9,
        max_tree_depth: 8,
        max_divergence_fraction: 0.5,
        seed: Some(seed),
        ..SamplerSettings::default()
    }
}

fn moments(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var)
}

fn step_series(n: usize, split: usize, low: f64, high: f64, sd: f64, seed: u64) -> Vec<f64> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let noise = Normal::new(0.0, sd).expect("valid normal");
    (0..n)
        .map(|t| (if t < split { low } else { high }) + noise.sample(&mut rng))
        .collect()
}

#[test]
fn nuts_recovers_standard_normal_moments() {
    let model = StdNormal {
        dim: 2,
        gradient: true,
    };
    let trace = sample(&model, &settings(1000, 500, 2, 17), &ExecutionContext::new())
        .expect("sampling should succeed");
    assert_eq!(trace.kernel, SamplerKernel::Nuts);
    assert_eq!(trace.total_draws(), 2000);
    assert_eq!(trace.total_divergences(), 0);

    for name in ["x[0]", "x[1]"] {
        let (mean, var) = moments(&trace.pooled(name).expect("parameter exists"));
        assert!(mean.abs() < 0.15, "{name} mean={mean}");
        assert!((var - 1.0).abs() < 0.25, "{name} var={var}");
    }
    for chain in &trace.chains {
        assert!(chain.stats.step_size > 0.0);
        assert!(chain.stats.mean_accept > 0.5);
    }
}

#[test]
fn metropolis_recovers_standard_normal_moments() {
    let model = StdNormal {
        dim: 2,
        gradient: false,
    };
    let trace = sample(&model, &settings(3000, 1000, 2, 5), &ExecutionContext::new())
        .expect("sampling should succeed");
    assert_eq!(trace.kernel, SamplerKernel::Metropolis);
    let (mean, var) = moments(&trace.pooled("x[0]").expect("parameter exists"));
    assert!(mean.abs() < 0.2, "mean={mean}");
    assert!((var - 1.0).abs() < 0.3, "var={var}");
}

#[test]
fn fixed_seed_reproduces_the_trace() {
    let model = StdNormal {
        dim: 3,
        gradient: true,
    };
    let run = || {
        sample(&model, &settings(100, 100, 3, 99), &ExecutionContext::new())
            .expect("sampling should succeed")
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);
    assert_eq!(first.seed, 99);
    assert_ne!(first.chains[0].draws, first.chains[1].draws);
}

#[test]
fn cancelled_run_returns_cancelled() {
    let model = StdNormal {
        dim: 1,
        gradient: true,
    };
    let cancel = CancelToken::new();
    cancel.cancel();
    let ctx = ExecutionContext::new().with_cancel(&cancel);
    let err = sample(&model, &settings(100, 100, 2, 1), &ctx).expect_err("run must be cancelled");
    assert_eq!(err.code(), "cancelled");
}

#[test]
fn invalid_settings_fail_before_sampling() {
    let model = StdNormal {
        dim: 1,
        gradient: true,
    };
    let mut bad = settings(100, 100, 2, 1);
    bad.chains = 0;
    let err = sample(&model, &bad, &ExecutionContext::new()).expect_err("zero chains");
    assert_eq!(err.code(), "config_error");
}

#[derive(Default)]
struct RecordingSink {
    last: Mutex<Vec<f32>>,
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, chain: usize, fraction: f32) {
        let mut last = self.last.lock().expect("lock");
        if last.len() <= chain {
            last.resize(chain + 1, 0.0);
        }
        last[chain] = fraction;
    }
}

#[test]
fn progress_reaches_completion_for_every_chain() {
    let model = StdNormal {
        dim: 1,
        gradient: false,
    };
    let sink = RecordingSink::default();
    let ctx = ExecutionContext::new().with_progress_sink(&sink);
    sample(&model, &settings(30, 20, 2, 4), &ctx).expect("sampling should succeed");
    let last = sink.last.lock().expect("lock");
    assert_eq!(last.as_slice(), &[1.0, 1.0]);
}

#[test]
fn single_change_point_is_located_by_nuts() {
    let data = step_series(120, 60, 0.0, 0.05, 0.01, 2024);
    let model = SingleChangePointModel::new(data, SinglePriors::default()).expect("model");
    let mut run = settings(300, 300, 2, 42);
    run.target_accept = 0.95;
    let trace = sample(&model, &run, &ExecutionContext::new()).expect("sampling should succeed");

    let (tau, _) = moments(&trace.pooled("tau").expect("tau"));
    assert!((55.0..=65.0).contains(&tau), "tau mean={tau}");
    let (mu1, _) = moments(&trace.pooled("mu1").expect("mu1"));
    let (mu2, _) = moments(&trace.pooled("mu2").expect("mu2"));
    assert!(((mu2 - mu1) - 0.05).abs() < 0.015, "mu1={mu1} mu2={mu2}");
}

#[test]
fn multiple_change_points_are_located_by_metropolis() {
    let mut data = step_series(40, 40, 0.0, 0.0, 0.5, 1);
    data.extend(step_series(60, 60, 3.0, 3.0, 0.5, 2));
    data.extend(step_series(50, 50, -2.0, -2.0, 0.5, 3));
    let model =
        MultipleChangePointModel::new(data, 2, MultiplePriors::default()).expect("model");
    let trace = sample(&model, &settings(500, 1000, 2, 8), &ExecutionContext::new())
        .expect("sampling should succeed");
    assert_eq!(trace.kernel, SamplerKernel::Metropolis);

    let first = trace.pooled("changepoints[0]").expect("changepoints[0]");
    let second = trace.pooled("changepoints[1]").expect("changepoints[1]");
    assert!(first.iter().zip(&second).all(|(a, b)| a <= b));
    let (m0, _) = moments(&first);
    let (m1, _) = moments(&second);
    assert!((m0 - 40.0).abs() <= 10.0, "changepoints[0] mean={m0}");
    assert!((m1 - 100.0).abs() <= 10.0, "changepoints[1] mean={m1}");
}
