// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::summarizer::{ChangePointEstimate, ChangePointPosterior};
use bcpd_core::numeric::{mean, std_population};
use bcpd_core::{BcpdError, ObservationSeries};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

pub const DEFAULT_WINDOW_BEFORE: usize = 30;
pub const DEFAULT_WINDOW_AFTER: usize = 30;

/// Window sizes, in observations, on either side of a change point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    pub window_before: usize,
    pub window_after: usize,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            window_before: DEFAULT_WINDOW_BEFORE,
            window_after: DEFAULT_WINDOW_AFTER,
        }
    }
}

impl ImpactConfig {
    pub fn validate(&self) -> Result<(), BcpdError> {
        if self.window_before == 0 || self.window_after == 0 {
            return Err(BcpdError::config(format!(
                "impact windows must be >= 1; got window_before={}, window_after={}",
                self.window_before, self.window_after
            )));
        }
        Ok(())
    }
}

/// A quotient that is explicitly undefined instead of infinite or NaN.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Ratio {
    Defined(f64),
    Undefined,
}

impl Ratio {
    /// `numerator / denominator`; undefined for a zero denominator or a
    /// non-finite result.
    pub fn new(numerator: f64, denominator: f64) -> Self {
        if denominator == 0.0 {
            return Self::Undefined;
        }
        let value = numerator / denominator;
        if value.is_finite() {
            Self::Defined(value)
        } else {
            Self::Undefined
        }
    }

    pub fn scaled(self, factor: f64) -> Self {
        match self {
            Self::Defined(value) => Self::new(value * factor, 1.0),
            Self::Undefined => Self::Undefined,
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Defined(value) => Some(value),
            Self::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Self::Defined(_))
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(value) => write!(f, "{value}"),
            Self::Undefined => f.write_str("undefined"),
        }
    }
}

/// Mean, population standard deviation and size of one window. An empty
/// window has `n_obs == 0` and no mean or std.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub n_obs: usize,
}

impl WindowStats {
    fn from_window(values: &[f64]) -> Self {
        Self {
            mean: mean(values),
            std: std_population(values),
            n_obs: values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.n_obs == 0
    }
}

fn difference(after: Option<f64>, before: Option<f64>) -> Option<f64> {
    after
        .zip(before)
        .map(|(a, b)| a - b)
        .filter(|value| value.is_finite())
}

fn optional_ratio(numerator: Option<f64>, denominator: Option<f64>) -> Ratio {
    match (numerator, denominator) {
        (Some(n), Some(d)) => Ratio::new(n, d),
        _ => Ratio::Undefined,
    }
}

/// Point estimate a change point was resolved at before measuring impact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Mode,
    Mean,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mode => "mode",
            Self::Mean => "mean",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub parameter: String,
    pub change_point_index: usize,
    pub change_point_date: NaiveDate,
    pub resolution: Resolution,
    pub before: WindowStats,
    pub after: WindowStats,
    /// `after.mean - before.mean`; absent when either window is empty.
    pub mean_change: Option<f64>,
    /// `100 * (after.mean - before.mean) / before.mean`.
    pub percent_change: Ratio,
    pub volatility_change: Option<f64>,
    /// `(after.mean - before.mean) / before.std`; reported for the single
    /// change-point model only.
    pub effect_size: Option<Ratio>,
}

/// Before/after statistics around `index`: windows `[index - before, index)`
/// and `[index, index + after)`, clipped to the series.
///
/// A window clipped to nothing (a change point at index 0) leaves every
/// quantity that depends on it undefined rather than failing.
pub fn impact_at(
    series: &ObservationSeries,
    parameter: &str,
    index: usize,
    resolution: Resolution,
    config: &ImpactConfig,
    with_effect_size: bool,
) -> Result<ImpactReport, BcpdError> {
    config.validate()?;
    if index >= series.len() {
        return Err(BcpdError::invalid_input(format!(
            "change point index {index} is outside a series of length {}",
            series.len()
        )));
    }
    let (before_values, after_values) =
        series.split_windows(index, config.window_before, config.window_after);
    let before = WindowStats::from_window(before_values);
    let after = WindowStats::from_window(after_values);
    if before.is_empty() || after.is_empty() {
        warn!(
            index,
            before_n_obs = before.n_obs,
            after_n_obs = after.n_obs,
            "impact window is empty; dependent statistics are undefined"
        );
    }

    let mean_change = difference(after.mean, before.mean);
    let report = ImpactReport {
        parameter: parameter.to_string(),
        change_point_index: index,
        change_point_date: series.dates()[index],
        resolution,
        mean_change,
        percent_change: optional_ratio(mean_change, before.mean).scaled(100.0),
        volatility_change: difference(after.std, before.std),
        effect_size: with_effect_size.then(|| optional_ratio(mean_change, before.std)),
        before,
        after,
    };
    debug!(
        index,
        mean_change = ?report.mean_change,
        percent_change = %report.percent_change,
        "computed change-point impact"
    );
    Ok(report)
}

fn resolve(estimate: &ChangePointEstimate, resolution: Resolution) -> usize {
    match resolution {
        Resolution::Mode => estimate.mode_index,
        Resolution::Mean => estimate.mean_index,
    }
}

/// Impact of every change point in `posterior`.
///
/// The single model is resolved at its posterior mode and reports an effect
/// size; each change point of the multiple model is resolved at its posterior
/// mean, without effect size.
pub fn analyze_impact(
    posterior: &ChangePointPosterior,
    series: &ObservationSeries,
    config: &ImpactConfig,
) -> Result<Vec<ImpactReport>, BcpdError> {
    config.validate()?;
    match posterior {
        ChangePointPosterior::Single(estimate) => Ok(vec![impact_at(
            series,
            &estimate.parameter,
            resolve(estimate, Resolution::Mode),
            Resolution::Mode,
            config,
            true,
        )?]),
        ChangePointPosterior::Multiple(estimates) => estimates
            .iter()
            .map(|estimate| {
                impact_at(
                    series,
                    &estimate.parameter,
                    resolve(estimate, Resolution::Mean),
                    Resolution::Mean,
                    config,
                    false,
                )
            })
            .collect(),
    }
}
