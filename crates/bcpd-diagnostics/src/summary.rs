// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::stats::{ess_bulk, ess_mean, ess_sd, ess_tail, mcse_mean, mcse_sd, rhat};
use bcpd_core::BcpdError;
use bcpd_core::numeric::{hdi, mean, std_sample};
use bcpd_sampler::PosteriorTrace;
use serde::{Deserialize, Serialize};

/// Probability mass of the interval reported in summary rows.
pub const SUMMARY_HDI_PROB: f64 = 0.94;

/// One row of the posterior summary table. Statistics that are undefined for
/// the parameter (for instance R-hat of constant draws) are `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub hdi_low: f64,
    pub hdi_high: f64,
    pub mcse_mean: Option<f64>,
    pub mcse_sd: Option<f64>,
    pub ess_bulk: Option<f64>,
    pub ess_tail: Option<f64>,
    pub r_hat: Option<f64>,
}

impl ParameterSummary {
    /// True when R-hat or bulk ESS could not be computed.
    pub fn is_undefined(&self) -> bool {
        self.r_hat.is_none() || self.ess_bulk.is_none()
    }

    /// `mcse_mean / sd`, when both are defined and `sd > 0`.
    pub fn mcse_ratio(&self) -> Option<f64> {
        let mcse = self.mcse_mean?;
        (self.sd > 0.0).then(|| mcse / self.sd).filter(|r| r.is_finite())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub rows: Vec<ParameterSummary>,
}

impl ModelSummary {
    pub fn row(&self, name: &str) -> Option<&ParameterSummary> {
        self.rows.iter().find(|row| row.name == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn defined(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Summarizes one parameter given its per-chain draws.
pub fn summarize_parameter(
    name: &str,
    chains: &[Vec<f64>],
) -> Result<ParameterSummary, BcpdError> {
    let pooled: Vec<f64> = chains.iter().flatten().copied().collect();
    let mean = mean(&pooled).ok_or_else(|| {
        BcpdError::posterior(format!("parameter '{name}' has no retained draws"))
    })?;
    let sd = std_sample(&pooled).unwrap_or(0.0);
    let (hdi_low, hdi_high) = hdi(&pooled, SUMMARY_HDI_PROB)?;

    let ess_bulk = defined(ess_bulk(chains));
    let ess_of_mean = ess_mean(chains);
    let ess_of_sd = ess_sd(chains);

    Ok(ParameterSummary {
        name: name.to_string(),
        mean,
        sd,
        hdi_low,
        hdi_high,
        mcse_mean: defined(mcse_mean(sd, ess_of_mean)),
        mcse_sd: defined(mcse_sd(sd, ess_of_sd)),
        ess_bulk,
        ess_tail: defined(ess_tail(chains)),
        r_hat: defined(rhat(chains)),
    })
}

/// Summary table over every parameter of the trace, in trace order.
pub fn summarize(trace: &PosteriorTrace) -> Result<ModelSummary, BcpdError> {
    if trace.chains.is_empty() || trace.total_draws() == 0 {
        return Err(BcpdError::posterior("trace holds no draws"));
    }
    let rows = trace
        .parameters
        .iter()
        .map(|name| {
            let chains = trace.chain_values(name).ok_or_else(|| {
                BcpdError::posterior(format!("trace is missing parameter '{name}'"))
            })?;
            summarize_parameter(name, &chains)
        })
        .collect::<Result<Vec<_>, BcpdError>>()?;
    Ok(ModelSummary { rows })
}
