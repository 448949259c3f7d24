// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_cli::{AnalysisOptions, AnalysisOutcome, load_price_csv, run_analysis};
use bcpd_core::{BcpdError, ExecutionContext, ProgressSink, ReturnKind};
use bcpd_model::{ModelConfig, ModelKind};
use bcpd_posterior::{ChangePointPosterior, ImpactConfig, ImpactReport};
use bcpd_store::{ArtifactStore, PayloadCodec, RunLayout};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bcpd")]
#[command(about = "Detect Bayesian change points in a price series and measure their impact")]
#[command(version)]
struct Cli {
    /// CSV file with `date` and `price` columns
    input: PathBuf,

    /// JSON model configuration; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output root holding `models/saved/<run>/` and `results/tables/<run>/`
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Run directory name (defaults to the model type)
    #[arg(long)]
    run_name: Option<String>,

    /// `single` or `multiple`
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    n_changepoints: Option<usize>,

    #[arg(long)]
    draws: Option<usize>,

    #[arg(long)]
    tune: Option<usize>,

    #[arg(long)]
    chains: Option<usize>,

    #[arg(long)]
    target_accept: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    window_before: Option<usize>,

    #[arg(long)]
    window_after: Option<usize>,

    #[arg(long, value_enum, default_value_t = ReturnsArg::Log)]
    returns: ReturnsArg,

    #[arg(long, value_enum, default_value_t = CodecArg::Json)]
    trace_codec: CodecArg,

    /// Fail without writing artifacts when convergence checks do not pass
    #[arg(long)]
    strict: bool,

    /// Skip writing artifacts
    #[arg(long)]
    no_persist: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReturnsArg {
    Log,
    Simple,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CodecArg {
    Json,
    Bincode,
}

impl From<ReturnsArg> for ReturnKind {
    fn from(arg: ReturnsArg) -> Self {
        match arg {
            ReturnsArg::Log => Self::Log,
            ReturnsArg::Simple => Self::Simple,
        }
    }
}

impl From<CodecArg> for PayloadCodec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Json => Self::Json,
            CodecArg::Bincode => Self::Bincode,
        }
    }
}

struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, chain: usize, fraction: f32) {
        debug!(chain, progress = fraction, "sampling progress");
    }
}

#[derive(Serialize)]
struct RunOutput<'a> {
    model: &'static str,
    n_obs: usize,
    converged: bool,
    divergences: usize,
    change_points: &'a ChangePointPosterior,
    impacts: &'a [ImpactReport],
    artifacts: Vec<&'a Path>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Serialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = run(cli) {
        emit_structured_error(&err);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config(cli: &Cli) -> Result<ModelConfig, BcpdError> {
    let mut config = match &cli.config {
        Some(path) => ModelConfig::from_json_file(path)?,
        None => ModelConfig::default(),
    };
    if let Some(raw) = &cli.model {
        config.model = ModelKind::parse(raw)?;
    }
    if let Some(k) = cli.n_changepoints {
        config.n_changepoints = Some(k);
    }
    if let Some(draws) = cli.draws {
        config.sampling.draws = draws;
    }
    if let Some(tune) = cli.tune {
        config.sampling.tune = tune;
    }
    if let Some(chains) = cli.chains {
        config.sampling.chains = chains;
    }
    if let Some(target_accept) = cli.target_accept {
        config.sampling.target_accept = target_accept;
    }
    if let Some(seed) = cli.seed {
        config.sampling.seed = Some(seed);
    }
    config.validate()?;
    Ok(config)
}

fn resolve_options(cli: &Cli) -> AnalysisOptions {
    let defaults = ImpactConfig::default();
    AnalysisOptions {
        impact: ImpactConfig {
            window_before: cli.window_before.unwrap_or(defaults.window_before),
            window_after: cli.window_after.unwrap_or(defaults.window_after),
        },
        returns: cli.returns.into(),
        strict: cli.strict,
    }
}

fn run(cli: Cli) -> Result<(), BcpdError> {
    let config = resolve_config(&cli)?;
    let options = resolve_options(&cli);
    let records = load_price_csv(&cli.input)?;

    let store = if cli.no_persist {
        None
    } else {
        let run_name = cli
            .run_name
            .clone()
            .unwrap_or_else(|| config.model.as_str().to_string());
        let layout = RunLayout::new(&cli.output, run_name)?;
        Some(ArtifactStore::new(layout).with_codec(cli.trace_codec.into()))
    };

    let progress = LogProgress;
    let ctx = ExecutionContext::new().with_progress_sink(&progress);
    let outcome = run_analysis(&records, &config, &options, store.as_ref(), &ctx)?;
    write_json_output(&run_output(&config, &outcome))
}

fn run_output<'a>(config: &ModelConfig, outcome: &'a AnalysisOutcome) -> RunOutput<'a> {
    RunOutput {
        model: config.model.as_str(),
        n_obs: outcome.series.len(),
        converged: outcome.convergence.passed(),
        divergences: outcome.trace.total_divergences(),
        change_points: &outcome.change_points,
        impacts: &outcome.impacts,
        artifacts: outcome
            .persisted
            .as_ref()
            .map(|paths| paths.written.iter().map(PathBuf::as_path).collect())
            .unwrap_or_default(),
    }
}

fn write_json_output<T: Serialize>(payload: &T) -> Result<(), BcpdError> {
    let encoded = serde_json::to_string_pretty(payload).map_err(|err| {
        BcpdError::serialization(format!("failed to serialize JSON output: {err}"))
    })?;
    println!("{encoded}");
    Ok(())
}

fn emit_structured_error(err: &BcpdError) {
    let envelope = ErrorEnvelope {
        error: ErrorPayload {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    };

    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!(
            "{{\"error\":{{\"code\":\"{}\",\"message\":\"{}\"}}}}",
            err.code(),
            err
        ),
    }
}
