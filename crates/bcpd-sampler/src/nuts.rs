// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Multinomial No-U-Turn sampler with a diagonal metric.
//!
//! Trajectories are extended by repeated doubling in a random direction. Inside
//! a subtree the proposal is drawn in proportion to `exp(-H)`; across doublings
//! the draw is biased toward the newest subtree. A subtree is rejected when its
//! ends turn back on each other (including the two checks across the merge
//! seam) or when the energy error exceeds [`MAX_ENERGY_ERROR`].

use crate::adapt::{DualAveraging, WelfordVariance, WindowSchedule};
use crate::kernel::{ChainKernel, ChainState, Transition};
use bcpd_core::BcpdError;
use bcpd_model::GenerativeModel;
use rand::Rng;
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::debug;

pub const MAX_ENERGY_ERROR: f64 = 1000.0;
const MAX_STEP_SIZE_SEARCH: usize = 100;
const LOG_ACCEPT_THRESHOLD: f64 = -0.223_143_551_314_209_7; // ln(0.8)

#[derive(Clone, Debug)]
struct Point {
    q: Vec<f64>,
    p: Vec<f64>,
    p_sharp: Vec<f64>,
    grad: Vec<f64>,
    log_density: f64,
}

#[derive(Clone, Debug)]
struct Tree {
    minus: Point,
    plus: Point,
    proposal: Point,
    rho: Vec<f64>,
    log_sum_weight: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct BuildStats {
    n_leapfrog: usize,
    sum_accept: f64,
    divergent: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Self::Forward => 1.0,
            Self::Backward => -1.0,
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

fn no_u_turn(p_sharp_minus: &[f64], p_sharp_plus: &[f64], rho: &[f64]) -> bool {
    dot(p_sharp_plus, rho) > 0.0 && dot(p_sharp_minus, rho) > 0.0
}

/// NUTS state for one chain: step size, diagonal inverse metric and their adaptors.
#[derive(Clone, Debug)]
pub struct NutsKernel {
    step_size: f64,
    inv_metric: Vec<f64>,
    max_tree_depth: usize,
    dual_averaging: DualAveraging,
    schedule: WindowSchedule,
    variance: WelfordVariance,
    depth_sum: usize,
    depth_hits: usize,
    transitions: usize,
}

impl NutsKernel {
    pub fn new<M: GenerativeModel + ?Sized>(
        model: &M,
        state: &ChainState,
        target_accept: f64,
        max_tree_depth: usize,
        tune: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<Self, BcpdError> {
        let inv_metric: Vec<f64> = model
            .initial_scales()
            .iter()
            .map(|s| if s.is_finite() && *s > 0.0 { s * s } else { 1.0 })
            .collect();
        let mut kernel = Self {
            step_size: 1.0,
            inv_metric,
            max_tree_depth,
            dual_averaging: DualAveraging::new(target_accept, 1.0),
            schedule: WindowSchedule::new(tune),
            variance: WelfordVariance::new(model.dim()),
            depth_sum: 0,
            depth_hits: 0,
            transitions: 0,
        };
        kernel.find_reasonable_step_size(model, state, rng)?;
        kernel.dual_averaging.restart(kernel.step_size);
        Ok(kernel)
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn inv_metric(&self) -> &[f64] {
        &self.inv_metric
    }

    fn evaluate<M: GenerativeModel + ?Sized>(
        model: &M,
        q: &[f64],
        grad: &mut [f64],
    ) -> Result<f64, BcpdError> {
        model.log_density_gradient(q, grad).ok_or_else(|| {
            BcpdError::sampling("NUTS requires a model with a log-density gradient")
        })
    }

    fn kinetic_energy(&self, p: &[f64]) -> f64 {
        0.5 * p
            .iter()
            .zip(&self.inv_metric)
            .map(|(pi, m)| pi * pi * m)
            .sum::<f64>()
    }

    fn hamiltonian(&self, point: &Point) -> f64 {
        let h = -point.log_density + self.kinetic_energy(&point.p);
        if h.is_nan() { f64::INFINITY } else { h }
    }

    fn sample_momentum(&self, rng: &mut Xoshiro256PlusPlus) -> (Vec<f64>, Vec<f64>) {
        let p: Vec<f64> = self
            .inv_metric
            .iter()
            .map(|m| {
                let z: f64 = rng.sample(StandardNormal);
                z / m.sqrt()
            })
            .collect();
        let p_sharp = p.iter().zip(&self.inv_metric).map(|(pi, m)| pi * m).collect();
        (p, p_sharp)
    }

    fn start_point(&self, state: &ChainState, rng: &mut Xoshiro256PlusPlus) -> Point {
        let (p, p_sharp) = self.sample_momentum(rng);
        Point {
            q: state.position.clone(),
            p,
            p_sharp,
            grad: state.gradient.clone(),
            log_density: state.log_density,
        }
    }

    fn leapfrog<M: GenerativeModel + ?Sized>(
        &self,
        model: &M,
        from: &Point,
        epsilon: f64,
    ) -> Result<Point, BcpdError> {
        let half = 0.5 * epsilon;
        let mut p: Vec<f64> = from.p.iter().zip(&from.grad).map(|(p, g)| p + half * g).collect();
        let q: Vec<f64> = from
            .q
            .iter()
            .zip(&p)
            .zip(&self.inv_metric)
            .map(|((q, p), m)| q + epsilon * m * p)
            .collect();
        let mut grad = vec![0.0; q.len()];
        let log_density = Self::evaluate(model, &q, &mut grad)?;
        for (pi, g) in p.iter_mut().zip(&grad) {
            *pi += half * g;
        }
        let p_sharp = p.iter().zip(&self.inv_metric).map(|(pi, m)| pi * m).collect();
        Ok(Point {
            q,
            p,
            p_sharp,
            grad,
            log_density: if log_density.is_nan() {
                f64::NEG_INFINITY
            } else {
                log_density
            },
        })
    }

    /// Doubles or halves the step size until one leapfrog step crosses an
    /// acceptance probability of 0.8.
    fn find_reasonable_step_size<M: GenerativeModel + ?Sized>(
        &mut self,
        model: &M,
        state: &ChainState,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<(), BcpdError> {
        let mut direction = 0.0;
        for _ in 0..MAX_STEP_SIZE_SEARCH {
            let start = self.start_point(state, rng);
            let h0 = self.hamiltonian(&start);
            let next = self.leapfrog(model, &start, self.step_size)?;
            let delta_h = h0 - self.hamiltonian(&next);
            let delta_h = if delta_h.is_nan() { f64::NEG_INFINITY } else { delta_h };

            if direction == 0.0 {
                direction = if delta_h > LOG_ACCEPT_THRESHOLD { 1.0 } else { -1.0 };
            } else if (direction > 0.0 && delta_h <= LOG_ACCEPT_THRESHOLD)
                || (direction < 0.0 && delta_h >= LOG_ACCEPT_THRESHOLD)
            {
                break;
            }

            self.step_size = if direction > 0.0 {
                self.step_size * 2.0
            } else {
                self.step_size * 0.5
            };
            if self.step_size > 1e7 {
                return Err(BcpdError::sampling(
                    "step size search diverged; posterior appears improper",
                ));
            }
            if self.step_size < 1e-12 {
                return Err(BcpdError::sampling(
                    "step size search collapsed; log density is not finite near the initial point",
                ));
            }
        }
        Ok(())
    }

    fn build_tree<M: GenerativeModel + ?Sized>(
        &self,
        model: &M,
        from: &Point,
        depth: usize,
        direction: Direction,
        h0: f64,
        rng: &mut Xoshiro256PlusPlus,
        stats: &mut BuildStats,
    ) -> Result<Option<Tree>, BcpdError> {
        if depth == 0 {
            let point = self.leapfrog(model, from, direction.sign() * self.step_size)?;
            let h = self.hamiltonian(&point);
            stats.n_leapfrog += 1;
            let energy_error = h - h0;
            if !h.is_finite() || energy_error > MAX_ENERGY_ERROR {
                stats.divergent = true;
                return Ok(None);
            }
            stats.sum_accept += (-energy_error).exp().min(1.0);
            return Ok(Some(Tree {
                rho: point.p.clone(),
                minus: point.clone(),
                plus: point.clone(),
                proposal: point,
                log_sum_weight: -energy_error,
            }));
        }

        let Some(inner) = self.build_tree(model, from, depth - 1, direction, h0, rng, stats)?
        else {
            return Ok(None);
        };
        let edge = match direction {
            Direction::Forward => &inner.plus,
            Direction::Backward => &inner.minus,
        };
        let Some(outer) = self.build_tree(model, edge, depth - 1, direction, h0, rng, stats)?
        else {
            return Ok(None);
        };
        let (tree, turning) = merge(inner, outer, direction, rng, false);
        Ok((!turning).then_some(tree))
    }

    fn sample_trajectory<M: GenerativeModel + ?Sized>(
        &mut self,
        model: &M,
        state: &mut ChainState,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<Transition, BcpdError> {
        let start = self.start_point(state, rng);
        let h0 = self.hamiltonian(&start);
        let mut tree = Tree {
            rho: start.p.clone(),
            minus: start.clone(),
            plus: start.clone(),
            proposal: start,
            log_sum_weight: 0.0,
        };
        let mut stats = BuildStats::default();
        let mut depth = 0;

        while depth < self.max_tree_depth {
            let direction = if rng.random::<bool>() {
                Direction::Forward
            } else {
                Direction::Backward
            };
            let edge = match direction {
                Direction::Forward => tree.plus.clone(),
                Direction::Backward => tree.minus.clone(),
            };
            let subtree = self.build_tree(model, &edge, depth, direction, h0, rng, &mut stats)?;
            depth += 1;
            let Some(subtree) = subtree else {
                break;
            };
            // On a U-turn the proposal drawn from the new subtree is kept.
            let (merged, turning) = merge(tree, subtree, direction, rng, true);
            tree = merged;
            if turning {
                break;
            }
        }

        let accept_stat = if stats.n_leapfrog > 0 {
            stats.sum_accept / stats.n_leapfrog as f64
        } else {
            0.0
        };
        if depth >= self.max_tree_depth {
            self.depth_hits += 1;
        }
        self.depth_sum += depth;
        self.transitions += 1;

        state.position = tree.proposal.q;
        state.gradient = tree.proposal.grad;
        state.log_density = tree.proposal.log_density;

        Ok(Transition {
            accept_stat,
            divergent: stats.divergent,
            tree_depth: depth,
        })
    }
}

/// Joins two adjacent trees, `outer` having been built past `inner` in
/// `direction`, and reports whether the joined trajectory makes a U-turn.
///
/// `biased` selects the top-level progressive sampling rule that favours the
/// newer subtree; otherwise the proposal is drawn in proportion to weight.
fn merge(
    inner: Tree,
    outer: Tree,
    direction: Direction,
    rng: &mut Xoshiro256PlusPlus,
    biased: bool,
) -> (Tree, bool) {
    let log_sum_weight = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
    let take_outer = if biased {
        let ratio = (outer.log_sum_weight - inner.log_sum_weight).exp();
        ratio >= 1.0 || rng.random::<f64>() < ratio
    } else {
        rng.random::<f64>() < (outer.log_sum_weight - log_sum_weight).exp()
    };

    let (before, after) = match direction {
        Direction::Forward => (inner, outer),
        Direction::Backward => (outer, inner),
    };
    let rho = add(&before.rho, &after.rho);

    let turning = !no_u_turn(&before.minus.p_sharp, &after.plus.p_sharp, &rho)
        || !no_u_turn(
            &before.minus.p_sharp,
            &after.minus.p_sharp,
            &add(&before.rho, &after.minus.p),
        )
        || !no_u_turn(
            &before.plus.p_sharp,
            &after.plus.p_sharp,
            &add(&after.rho, &before.plus.p),
        );

    let proposal = match (take_outer, direction) {
        (true, Direction::Forward) | (false, Direction::Backward) => after.proposal,
        (false, Direction::Forward) | (true, Direction::Backward) => before.proposal,
    };

    let tree = Tree {
        minus: before.minus,
        plus: after.plus,
        proposal,
        rho,
        log_sum_weight,
    };
    (tree, turning)
}

impl ChainKernel for NutsKernel {
    fn transition<M: GenerativeModel + ?Sized>(
        &mut self,
        model: &M,
        state: &mut ChainState,
        rng: &mut Xoshiro256PlusPlus,
        tune_iteration: Option<usize>,
    ) -> Result<Transition, BcpdError> {
        let transition = self.sample_trajectory(model, state, rng)?;
        let Some(iteration) = tune_iteration else {
            return Ok(transition);
        };

        self.step_size = self.dual_averaging.update(transition.accept_stat);
        if self.schedule.in_slow_phase(iteration) {
            self.variance.add(&state.position);
        }
        if self.schedule.is_window_end(iteration) {
            self.inv_metric = self.variance.regularized_variance();
            debug!(
                iteration,
                samples = self.variance.count(),
                "updated diagonal metric"
            );
            self.variance.restart();
            self.find_reasonable_step_size(model, state, rng)?;
            self.dual_averaging.restart(self.step_size);
        }
        Ok(transition)
    }

    fn finish_tuning(&mut self) {
        let averaged = self.dual_averaging.final_step_size();
        if averaged.is_finite() && averaged > 0.0 {
            self.step_size = averaged;
        }
        self.depth_sum = 0;
        self.depth_hits = 0;
        self.transitions = 0;
        debug!(step_size = self.step_size, "NUTS tuning finished");
    }

    fn step_size(&self) -> f64 {
        self.step_size
    }

    fn mean_tree_depth(&self) -> f64 {
        if self.transitions == 0 {
            0.0
        } else {
            self.depth_sum as f64 / self.transitions as f64
        }
    }

    fn max_tree_depth_hits(&self) -> usize {
        self.depth_hits
    }
}
