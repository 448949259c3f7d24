// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_core::BcpdError;
use bcpd_model::GenerativeModel;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Current position of a chain in unconstrained space.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainState {
    pub position: Vec<f64>,
    pub log_density: f64,
    /// Empty for kernels that never evaluate the gradient.
    pub gradient: Vec<f64>,
}

impl ChainState {
    pub fn without_gradient<M: GenerativeModel + ?Sized>(model: &M, position: Vec<f64>) -> Self {
        let log_density = model.log_density(&position);
        Self {
            position,
            log_density,
            gradient: Vec::new(),
        }
    }

    pub fn with_gradient<M: GenerativeModel + ?Sized>(
        model: &M,
        position: Vec<f64>,
    ) -> Result<Self, BcpdError> {
        let mut gradient = vec![0.0; position.len()];
        let log_density = model
            .log_density_gradient(&position, &mut gradient)
            .ok_or_else(|| BcpdError::sampling("model does not provide a gradient"))?;
        Ok(Self {
            position,
            log_density,
            gradient,
        })
    }

    pub fn is_usable(&self) -> bool {
        self.log_density.is_finite() && self.gradient.iter().all(|g| g.is_finite())
    }
}

/// Outcome of one transition.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Transition {
    pub accept_stat: f64,
    pub divergent: bool,
    pub tree_depth: usize,
}

/// A Markov transition kernel that adapts while `tune_iteration` is `Some`.
pub trait ChainKernel {
    fn transition<M: GenerativeModel + ?Sized>(
        &mut self,
        model: &M,
        state: &mut ChainState,
        rng: &mut Xoshiro256PlusPlus,
        tune_iteration: Option<usize>,
    ) -> Result<Transition, BcpdError>;

    /// Freezes adaptation and resets per-phase counters.
    fn finish_tuning(&mut self);

    fn step_size(&self) -> f64;

    fn mean_tree_depth(&self) -> f64 {
        0.0
    }

    fn max_tree_depth_hits(&self) -> usize {
        0
    }
}
