// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod adapt;
pub mod kernel;
pub mod metropolis;
pub mod nuts;
pub mod trace;

pub use kernel::{ChainKernel, ChainState, Transition};
pub use metropolis::MetropolisKernel;
pub use nuts::NutsKernel;
pub use trace::{ChainStats, ChainTrace, PosteriorTrace, SamplerKernel};

use bcpd_core::{BcpdError, ExecutionContext};
use bcpd_model::{GenerativeModel, SamplerSettings};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, info, warn};

const MAX_INIT_ATTEMPTS: usize = 16;

/// Posterior sampling for bcpd change-point models.
pub fn crate_name() -> &'static str {
    "bcpd-sampler"
}

/// Kernel chosen for `model`: NUTS when a gradient is available.
pub fn kernel_for<M: GenerativeModel + ?Sized>(model: &M) -> SamplerKernel {
    if model.supports_gradient() {
        SamplerKernel::Nuts
    } else {
        SamplerKernel::Metropolis
    }
}

/// Draws `settings.draws` posterior samples per chain after `settings.tune`
/// adaptation iterations, running chains in parallel.
///
/// Fails with a sampling error when no finite starting point is found or when
/// post-tuning divergences exceed [`SamplerSettings::divergence_tolerance`].
pub fn sample<M: GenerativeModel + ?Sized>(
    model: &M,
    settings: &SamplerSettings,
    ctx: &ExecutionContext<'_>,
) -> Result<PosteriorTrace, BcpdError> {
    settings.validate()?;
    ctx.check_cancelled()?;

    let kernel = kernel_for(model);
    let seed = settings.seed.unwrap_or_else(rand::random);
    info!(
        kernel = kernel.as_str(),
        chains = settings.chains,
        draws = settings.draws,
        tune = settings.tune,
        seed,
        "sampling posterior"
    );

    let run = |chain: usize| run_chain(model, settings, kernel, seed, chain, ctx);

    #[cfg(feature = "rayon")]
    let chains = (0..settings.chains)
        .into_par_iter()
        .map(run)
        .collect::<Result<Vec<_>, BcpdError>>()?;

    #[cfg(not(feature = "rayon"))]
    let chains = (0..settings.chains)
        .map(run)
        .collect::<Result<Vec<_>, BcpdError>>()?;

    let trace = PosteriorTrace {
        model: model.kind(),
        kernel,
        seed,
        draws: settings.draws,
        tune: settings.tune,
        n_obs: model.n_obs(),
        parameters: model.parameter_names(),
        chains,
    };

    let divergences = trace.total_divergences();
    let tolerance = settings.divergence_tolerance();
    if divergences > 0 {
        warn!(divergences, tolerance, "divergent transitions after tuning");
    }
    if divergences > tolerance {
        return Err(BcpdError::sampling(format!(
            "{divergences} divergent transitions exceed the tolerance of {tolerance}"
        )));
    }

    info!(draws = trace.total_draws(), divergences, "sampling finished");
    Ok(trace)
}

fn chain_rng(seed: u64, chain: usize) -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(seed.wrapping_add(chain as u64))
}

/// Model initial point jittered by `U(-1, 1)` times each coordinate's scale,
/// retried until the log density (and gradient, if needed) is finite.
fn initial_state<M: GenerativeModel + ?Sized>(
    model: &M,
    kernel: SamplerKernel,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<ChainState, BcpdError> {
    let base = model.initial_point();
    let scales = model.initial_scales();
    for _ in 0..MAX_INIT_ATTEMPTS {
        let position: Vec<f64> = base
            .iter()
            .zip(&scales)
            .map(|(x, s)| x + s * rng.random_range(-1.0..1.0))
            .collect();
        let state = match kernel {
            SamplerKernel::Nuts => ChainState::with_gradient(model, position)?,
            SamplerKernel::Metropolis => ChainState::without_gradient(model, position),
        };
        if state.is_usable() {
            return Ok(state);
        }
    }
    Err(BcpdError::sampling(format!(
        "no finite initial point found after {MAX_INIT_ATTEMPTS} attempts"
    )))
}

fn run_chain<M: GenerativeModel + ?Sized>(
    model: &M,
    settings: &SamplerSettings,
    kernel: SamplerKernel,
    seed: u64,
    chain: usize,
    ctx: &ExecutionContext<'_>,
) -> Result<ChainTrace, BcpdError> {
    let mut rng = chain_rng(seed, chain);
    let mut state = initial_state(model, kernel, &mut rng)?;
    match kernel {
        SamplerKernel::Nuts => {
            let mut nuts = NutsKernel::new(
                model,
                &state,
                settings.target_accept,
                settings.max_tree_depth,
                settings.tune,
                &mut rng,
            )?;
            drive(&mut nuts, model, settings, chain, &mut state, &mut rng, ctx)
        }
        SamplerKernel::Metropolis => {
            let mut metropolis = MetropolisKernel::new(model);
            drive(&mut metropolis, model, settings, chain, &mut state, &mut rng, ctx)
        }
    }
}

fn drive<K: ChainKernel, M: GenerativeModel + ?Sized>(
    kernel: &mut K,
    model: &M,
    settings: &SamplerSettings,
    chain: usize,
    state: &mut ChainState,
    rng: &mut Xoshiro256PlusPlus,
    ctx: &ExecutionContext<'_>,
) -> Result<ChainTrace, BcpdError> {
    let total = settings.tune + settings.draws;
    let every = settings.cancel_check_every.max(1);
    let mut draws = Vec::with_capacity(settings.draws);
    let mut divergences = 0usize;
    let mut accept_sum = 0.0;

    if settings.tune == 0 {
        kernel.finish_tuning();
    }

    for iteration in 0..total {
        ctx.check_cancelled_every(iteration, every)?;
        let tuning = iteration < settings.tune;
        let transition = kernel.transition(model, state, rng, tuning.then_some(iteration))?;

        if !state.log_density.is_finite() {
            return Err(BcpdError::sampling(format!(
                "chain {chain} reached a non-finite log density at iteration {iteration}"
            )));
        }

        if tuning {
            if iteration + 1 == settings.tune {
                kernel.finish_tuning();
            }
        } else {
            if transition.divergent {
                divergences += 1;
            }
            accept_sum += transition.accept_stat;
            draws.push(model.constrain(&state.position));
        }

        if (iteration + 1) % every == 0 || iteration + 1 == total {
            ctx.report_progress(chain, (iteration + 1) as f32 / total as f32);
        }
    }

    let stats = ChainStats {
        divergences,
        mean_accept: if draws.is_empty() {
            0.0
        } else {
            accept_sum / draws.len() as f64
        },
        step_size: kernel.step_size(),
        mean_tree_depth: kernel.mean_tree_depth(),
        max_tree_depth_hits: kernel.max_tree_depth_hits(),
    };
    debug!(
        chain,
        divergences,
        mean_accept = stats.mean_accept,
        step_size = stats.step_size,
        "chain finished"
    );

    Ok(ChainTrace {
        chain,
        draws,
        stats,
    })
}
