// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Adaptive Metropolis-within-Gibbs for models without a gradient.
//!
//! Each sweep proposes a Gaussian random-walk move on one coordinate at a time.
//! While tuning, every coordinate's log proposal scale moves by
//! `min(0.5, 1/sqrt(batch))` after each batch of sweeps, up when the batch
//! acceptance rate exceeds the target and down otherwise.

use crate::kernel::{ChainKernel, ChainState, Transition};
use bcpd_core::BcpdError;
use bcpd_model::GenerativeModel;
use rand::Rng;
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::debug;

pub const TARGET_ACCEPT_RATE: f64 = 0.44;
pub const BATCH_SIZE: usize = 50;

#[derive(Clone, Debug)]
pub struct MetropolisKernel {
    log_scales: Vec<f64>,
    batch_accepts: Vec<usize>,
    batch_sweeps: usize,
    batches: usize,
}

impl MetropolisKernel {
    pub fn new<M: GenerativeModel + ?Sized>(model: &M) -> Self {
        let log_scales: Vec<f64> = model
            .initial_scales()
            .iter()
            .map(|s| if s.is_finite() && *s > 0.0 { s.ln() } else { 0.0 })
            .collect();
        let dim = log_scales.len();
        Self {
            log_scales,
            batch_accepts: vec![0; dim],
            batch_sweeps: 0,
            batches: 0,
        }
    }

    pub fn scales(&self) -> Vec<f64> {
        self.log_scales.iter().map(|s| s.exp()).collect()
    }

    fn adapt(&mut self) {
        self.batches += 1;
        let delta = (1.0 / (self.batches as f64).sqrt()).min(0.5);
        for (log_scale, accepts) in self.log_scales.iter_mut().zip(&mut self.batch_accepts) {
            let rate = *accepts as f64 / self.batch_sweeps as f64;
            if rate > TARGET_ACCEPT_RATE {
                *log_scale += delta;
            } else {
                *log_scale -= delta;
            }
            *accepts = 0;
        }
        self.batch_sweeps = 0;
    }
}

impl ChainKernel for MetropolisKernel {
    fn transition<M: GenerativeModel + ?Sized>(
        &mut self,
        model: &M,
        state: &mut ChainState,
        rng: &mut Xoshiro256PlusPlus,
        tune_iteration: Option<usize>,
    ) -> Result<Transition, BcpdError> {
        let dim = state.position.len();
        let mut accepted = 0usize;
        for i in 0..dim {
            let previous = state.position[i];
            let z: f64 = rng.sample(StandardNormal);
            state.position[i] = previous + self.log_scales[i].exp() * z;
            let proposal = model.log_density(&state.position);
            let log_u = rng.random::<f64>().ln();
            if proposal.is_finite() && log_u < proposal - state.log_density {
                state.log_density = proposal;
                accepted += 1;
                if tune_iteration.is_some() {
                    self.batch_accepts[i] += 1;
                }
            } else {
                state.position[i] = previous;
            }
        }

        if tune_iteration.is_some() {
            self.batch_sweeps += 1;
            if self.batch_sweeps == BATCH_SIZE {
                self.adapt();
            }
        }

        Ok(Transition {
            accept_stat: if dim == 0 {
                0.0
            } else {
                accepted as f64 / dim as f64
            },
            divergent: false,
            tree_depth: 0,
        })
    }

    fn finish_tuning(&mut self) {
        self.batch_accepts.iter_mut().for_each(|a| *a = 0);
        self.batch_sweeps = 0;
        debug!(batches = self.batches, scales = ?self.scales(), "metropolis tuning finished");
    }

    fn step_size(&self) -> f64 {
        if self.log_scales.is_empty() {
            return 0.0;
        }
        self.log_scales.iter().map(|s| s.exp()).sum::<f64>() / self.log_scales.len() as f64
    }
}
