// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::summary::{ModelSummary, summarize};
use bcpd_core::BcpdError;
use bcpd_model::ConvergenceThresholds;
use bcpd_sampler::PosteriorTrace;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Convergence verdict for a sampling run.
///
/// `rhat_converged` requires every parameter's R-hat to be defined and the
/// largest to fall below the threshold; `ess_sufficient` likewise for the
/// smallest bulk ESS. Parameters with an undefined statistic are listed in
/// `undefined_parameters`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub rhat_max: Option<f64>,
    pub ess_min: Option<f64>,
    pub mcse_ratio_max: Option<f64>,
    pub rhat_converged: bool,
    pub ess_sufficient: bool,
    pub undefined_parameters: Vec<String>,
    #[serde(default)]
    pub divergences: usize,
    pub thresholds: ConvergenceThresholds,
}

fn max_defined(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().filter(|v| v.is_finite()).reduce(f64::max)
}

fn min_defined(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().filter(|v| v.is_finite()).reduce(f64::min)
}

impl ConvergenceReport {
    /// Evaluates a summary table against `thresholds`.
    pub fn from_summary(summary: &ModelSummary, thresholds: &ConvergenceThresholds) -> Self {
        let rhat_max = max_defined(summary.rows.iter().map(|row| row.r_hat));
        let ess_min = min_defined(summary.rows.iter().map(|row| row.ess_bulk));
        let mcse_ratio_max = max_defined(summary.rows.iter().map(|row| row.mcse_ratio()));

        let rhat_complete = summary.rows.iter().all(|row| row.r_hat.is_some());
        let ess_complete = summary.rows.iter().all(|row| row.ess_bulk.is_some());
        let undefined_parameters = summary
            .rows
            .iter()
            .filter(|row| row.is_undefined())
            .map(|row| row.name.clone())
            .collect();

        Self {
            rhat_max,
            ess_min,
            mcse_ratio_max,
            rhat_converged: rhat_complete
                && rhat_max.is_some_and(|r| r < thresholds.rhat_threshold),
            ess_sufficient: ess_complete && ess_min.is_some_and(|e| e > thresholds.ess_threshold),
            undefined_parameters,
            divergences: 0,
            thresholds: thresholds.clone(),
        }
    }

    pub fn passed(&self) -> bool {
        self.rhat_converged && self.ess_sufficient
    }

    /// Converts a failed verdict into a convergence-failure error.
    pub fn into_result(self) -> Result<Self, BcpdError> {
        if self.passed() {
            return Ok(self);
        }
        Err(BcpdError::convergence_failure(self.describe()))
    }

    /// Human-readable one-line verdict.
    pub fn describe(&self) -> String {
        let fmt = |v: Option<f64>| v.map_or_else(|| "undefined".to_string(), |v| format!("{v:.4}"));
        let mut text = format!(
            "rhat_max={} (threshold {}), ess_min={} (threshold {})",
            fmt(self.rhat_max),
            self.thresholds.rhat_threshold,
            fmt(self.ess_min),
            self.thresholds.ess_threshold,
        );
        if !self.undefined_parameters.is_empty() {
            text.push_str(&format!(
                ", undefined: {}",
                self.undefined_parameters.join(", ")
            ));
        }
        text
    }
}

/// Summary table plus convergence verdict for `trace`.
pub fn diagnose_with_summary(
    trace: &PosteriorTrace,
    thresholds: &ConvergenceThresholds,
) -> Result<(ModelSummary, ConvergenceReport), BcpdError> {
    thresholds.validate()?;
    let summary = summarize(trace)?;
    let mut report = ConvergenceReport::from_summary(&summary, thresholds);
    report.divergences = trace.total_divergences();

    if report.passed() {
        info!(
            rhat_max = ?report.rhat_max,
            ess_min = ?report.ess_min,
            "convergence checks passed"
        );
    } else {
        warn!(verdict = %report.describe(), "convergence checks failed");
    }
    Ok((summary, report))
}

/// Convergence verdict for `trace`. A pure function of the draws.
pub fn diagnose(
    trace: &PosteriorTrace,
    thresholds: &ConvergenceThresholds,
) -> Result<ConvergenceReport, BcpdError> {
    diagnose_with_summary(trace, thresholds).map(|(_, report)| report)
}

#[cfg(test)]
mod tests {
    use super::ConvergenceReport;
    use crate::summary::{ModelSummary, ParameterSummary};
    use bcpd_model::ConvergenceThresholds;

    fn row(name: &str, r_hat: Option<f64>, ess: Option<f64>) -> ParameterSummary {
        ParameterSummary {
            name: name.to_string(),
            mean: 0.0,
            sd: 1.0,
            hdi_low: -1.0,
            hdi_high: 1.0,
            mcse_mean: Some(0.02),
            mcse_sd: Some(0.01),
            ess_bulk: ess,
            ess_tail: ess,
            r_hat,
        }
    }

    #[test]
    fn passing_summary_passes() {
        let summary = ModelSummary {
            rows: vec![row("a", Some(1.001), Some(900.0)), row("b", Some(1.004), Some(650.0))],
        };
        let report = ConvergenceReport::from_summary(&summary, &ConvergenceThresholds::default());
        assert_eq!(report.rhat_max, Some(1.004));
        assert_eq!(report.ess_min, Some(650.0));
        assert_eq!(report.mcse_ratio_max, Some(0.02));
        assert!(report.passed());
        assert!(report.clone().into_result().is_ok());
    }

    #[test]
    fn threshold_breach_fails_with_convergence_failure() {
        let summary = ModelSummary {
            rows: vec![row("a", Some(1.05), Some(900.0)), row("b", Some(1.0), Some(120.0))],
        };
        let report = ConvergenceReport::from_summary(&summary, &ConvergenceThresholds::default());
        assert!(!report.rhat_converged);
        assert!(!report.ess_sufficient);
        let err = report.into_result().expect_err("must fail");
        assert_eq!(err.code(), "convergence_failure");
        assert!(!err.is_fatal());
    }

    #[test]
    fn undefined_statistics_fail_and_are_listed() {
        let summary = ModelSummary {
            rows: vec![row("a", Some(1.0), Some(900.0)), row("cp", None, None)],
        };
        let report = ConvergenceReport::from_summary(&summary, &ConvergenceThresholds::default());
        assert_eq!(report.rhat_max, Some(1.0));
        assert!(!report.rhat_converged);
        assert!(!report.ess_sufficient);
        assert_eq!(report.undefined_parameters, vec!["cp".to_string()]);
        assert!(report.describe().contains("undefined: cp"));
    }

    #[test]
    fn report_survives_json_with_undefined_values() {
        let summary = ModelSummary {
            rows: vec![row("cp", None, None)],
        };
        let report = ConvergenceReport::from_summary(&summary, &ConvergenceThresholds::default());
        let encoded = serde_json::to_string(&report).expect("encode");
        let decoded: ConvergenceReport = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, report);
        assert_eq!(decoded.rhat_max, None);
    }
}
