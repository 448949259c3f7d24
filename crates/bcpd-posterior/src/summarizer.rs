// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_core::numeric::{mean, median};
use bcpd_core::{BcpdError, ObservationSeries};
use bcpd_sampler::PosteriorTrace;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

pub use bcpd_core::numeric::hdi;

/// Probability mass of change-point credible intervals.
pub const CHANGE_POINT_HDI_PROB: f64 = 0.95;

const SINGLE_PARAMETER: &str = "tau";
const MULTIPLE_PREFIX: &str = "changepoints";

/// Point estimates and credible interval of one change-point location, in
/// index and calendar space. Every index lies in `[0, n - 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangePointEstimate {
    pub parameter: String,
    /// Unrounded posterior mean of the index draws.
    pub mean: f64,
    pub mean_index: usize,
    pub median_index: usize,
    pub mode_index: usize,
    pub mean_date: NaiveDate,
    pub median_date: NaiveDate,
    pub mode_date: NaiveDate,
    pub hdi_prob: f64,
    pub hdi_index: (usize, usize),
    pub hdi_dates: (NaiveDate, NaiveDate),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", content = "estimates", rename_all = "snake_case")]
pub enum ChangePointPosterior {
    Single(ChangePointEstimate),
    /// One estimate per change point, in index order.
    Multiple(Vec<ChangePointEstimate>),
}

impl ChangePointPosterior {
    pub fn estimates(&self) -> Vec<&ChangePointEstimate> {
        match self {
            Self::Single(estimate) => vec![estimate],
            Self::Multiple(estimates) => estimates.iter().collect(),
        }
    }
}

fn round_index(value: f64) -> i64 {
    value.round() as i64
}

/// Most frequent rounded draw; ties resolve to the smallest index.
pub fn mode_of_rounded(draws: &[f64]) -> Option<i64> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &draw in draws {
        *counts.entry(round_index(draw)).or_default() += 1;
    }
    let mut best: Option<(i64, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

/// Reduces index-valued draws of one change point to an estimate.
pub fn estimate_change_point(
    parameter: &str,
    draws: &[f64],
    series: &ObservationSeries,
) -> Result<ChangePointEstimate, BcpdError> {
    if series.is_empty() {
        return Err(BcpdError::insufficient_data(
            "cannot map change points onto an empty series",
        ));
    }
    let raw_mean = mean(draws).ok_or_else(|| {
        BcpdError::posterior(format!("'{parameter}' has no posterior draws"))
    })?;
    if draws.iter().any(|d| !d.is_finite()) {
        return Err(BcpdError::posterior(format!(
            "'{parameter}' has non-finite posterior draws"
        )));
    }
    let raw_median = median(draws).unwrap_or(raw_mean);
    let mode = mode_of_rounded(draws).unwrap_or_else(|| round_index(raw_mean));
    let (low, high) = hdi(draws, CHANGE_POINT_HDI_PROB)?;

    let mean_index = series.clamp_index(round_index(raw_mean));
    let median_index = series.clamp_index(round_index(raw_median));
    let mode_index = series.clamp_index(mode);
    let hdi_index = (
        series.clamp_index(low.floor() as i64),
        series.clamp_index(high.ceil() as i64),
    );
    let date = |index: usize| series.dates()[index];

    Ok(ChangePointEstimate {
        parameter: parameter.to_string(),
        mean: raw_mean,
        mean_index,
        median_index,
        mode_index,
        mean_date: date(mean_index),
        median_date: date(median_index),
        mode_date: date(mode_index),
        hdi_prob: CHANGE_POINT_HDI_PROB,
        hdi_index,
        hdi_dates: (date(hdi_index.0), date(hdi_index.1)),
    })
}

fn check_alignment(trace: &PosteriorTrace, series: &ObservationSeries) -> Result<(), BcpdError> {
    if trace.n_obs != series.len() {
        return Err(BcpdError::invalid_input(format!(
            "trace was sampled on {} observations but the series has {}",
            trace.n_obs,
            series.len()
        )));
    }
    Ok(())
}

/// Change-point estimates from `tau` (single model) or from
/// `changepoints[i]` (multiple model) draws pooled across chains.
pub fn summarize_change_points(
    trace: &PosteriorTrace,
    series: &ObservationSeries,
) -> Result<ChangePointPosterior, BcpdError> {
    check_alignment(trace, series)?;

    if let Some(draws) = trace.pooled(SINGLE_PARAMETER) {
        let estimate = estimate_change_point(SINGLE_PARAMETER, &draws, series)?;
        info!(
            mode_index = estimate.mode_index,
            mode_date = %estimate.mode_date,
            "summarized single change point"
        );
        return Ok(ChangePointPosterior::Single(estimate));
    }

    let entries = trace.vector_entries(MULTIPLE_PREFIX);
    if entries.is_empty() {
        return Err(BcpdError::posterior(format!(
            "trace has neither '{SINGLE_PARAMETER}' nor '{MULTIPLE_PREFIX}[..]' draws"
        )));
    }
    let estimates = entries
        .iter()
        .map(|name| {
            let draws = trace.pooled(name).ok_or_else(|| {
                BcpdError::posterior(format!("trace is missing parameter '{name}'"))
            })?;
            estimate_change_point(name, &draws, series)
        })
        .collect::<Result<Vec<_>, BcpdError>>()?;
    info!(count = estimates.len(), "summarized multiple change points");
    Ok(ChangePointPosterior::Multiple(estimates))
}

/// Calendar date of every pooled `tau` draw, for histogram rendering.
pub fn tau_dates(
    trace: &PosteriorTrace,
    series: &ObservationSeries,
) -> Result<Vec<NaiveDate>, BcpdError> {
    check_alignment(trace, series)?;
    let draws = trace
        .pooled(SINGLE_PARAMETER)
        .ok_or_else(|| BcpdError::posterior("trace has no 'tau' draws"))?;
    Ok(draws
        .iter()
        .map(|&draw| series.date_at(round_index(draw)))
        .collect())
}
