// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod loader;

use bcpd_core::{
    BcpdError, ExecutionContext, ObservationSeries, PriceRecord, ReturnKind, prepare_series,
};
use bcpd_diagnostics::{ConvergenceReport, ModelSummary, diagnose_with_summary};
use bcpd_model::{ModelBuilder, ModelConfig};
use bcpd_posterior::{
    ChangePointPosterior, ImpactConfig, ImpactReport, analyze_impact, summarize_change_points,
};
use bcpd_sampler::PosteriorTrace;
use bcpd_store::{ArtifactStore, PersistedPaths, RunArtifacts};
use tracing::{info, warn};

pub use loader::{load_price_csv, read_price_records};

/// Pipeline options that sit outside the model configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub impact: ImpactConfig,
    pub returns: ReturnKind,
    /// Fail with `ConvergenceFailure` before persisting when diagnostics
    /// miss their thresholds.
    pub strict: bool,
}

/// Everything one analysis run produces.
#[derive(Clone, Debug)]
pub struct AnalysisOutcome {
    pub series: ObservationSeries,
    pub trace: PosteriorTrace,
    pub summary: ModelSummary,
    pub convergence: ConvergenceReport,
    pub change_points: ChangePointPosterior,
    pub impacts: Vec<ImpactReport>,
    pub persisted: Option<PersistedPaths>,
}

impl AnalysisOutcome {
    pub fn artifacts(&self) -> RunArtifacts<'_> {
        RunArtifacts {
            trace: &self.trace,
            summary: &self.summary,
            convergence: &self.convergence,
            change_points: &self.change_points,
            impacts: &self.impacts,
        }
    }
}

/// Model, sample, diagnose, summarize and measure impact on an already
/// prepared return series. Nothing is written.
pub fn analyze_series(
    series: &ObservationSeries,
    config: &ModelConfig,
    options: &AnalysisOptions,
    ctx: &ExecutionContext<'_>,
) -> Result<AnalysisOutcome, BcpdError> {
    config.validate()?;
    options.impact.validate()?;

    let model = ModelBuilder::new(series.values(), config).build_configured()?;
    let trace = bcpd_sampler::sample(&model, &config.sampling, ctx)?;

    let (summary, convergence) = diagnose_with_summary(&trace, &config.convergence)?;
    if options.strict {
        convergence.clone().into_result()?;
    } else if !convergence.passed() {
        warn!(
            report = %convergence.describe(),
            "continuing with unconverged posterior"
        );
    }

    let change_points = summarize_change_points(&trace, series)?;
    let impacts = analyze_impact(&change_points, series, &options.impact)?;
    info!(
        model = config.model.as_str(),
        change_points = impacts.len(),
        converged = convergence.passed(),
        "analysis complete"
    );

    Ok(AnalysisOutcome {
        series: series.clone(),
        trace,
        summary,
        convergence,
        change_points,
        impacts,
        persisted: None,
    })
}

/// Full pipeline from raw price records to persisted artifacts. Artifacts
/// are written only after every stage has succeeded.
pub fn run_analysis(
    records: &[PriceRecord],
    config: &ModelConfig,
    options: &AnalysisOptions,
    store: Option<&ArtifactStore>,
    ctx: &ExecutionContext<'_>,
) -> Result<AnalysisOutcome, BcpdError> {
    config.validate()?;
    options.impact.validate()?;

    let prepared = prepare_series(records, options.returns)?;
    info!(
        prices = prepared.prices.len(),
        returns = prepared.returns.len(),
        "prepared return series"
    );

    let mut outcome = analyze_series(&prepared.returns, config, options, ctx)?;
    if let Some(store) = store {
        outcome.persisted = Some(store.persist(&outcome.artifacts())?);
    }
    Ok(outcome)
}

/// Command-line driver for bcpd.
pub fn crate_name() -> &'static str {
    "bcpd-cli"
}
