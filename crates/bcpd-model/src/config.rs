// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_core::BcpdError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_DRAWS: usize = 3000;
pub const DEFAULT_TUNE: usize = 1000;
pub const DEFAULT_CHAINS: usize = 4;
pub const DEFAULT_TARGET_ACCEPT: f64 = 0.99;
pub const DEFAULT_MAX_TREE_DEPTH: usize = 10;
pub const DEFAULT_MAX_DIVERGENCE_FRACTION: f64 = 0.25;
pub const DEFAULT_CANCEL_CHECK_EVERY: usize = 100;
pub const DEFAULT_RHAT_THRESHOLD: f64 = 1.01;
pub const DEFAULT_ESS_THRESHOLD: f64 = 400.0;
pub const DEFAULT_N_CHANGEPOINTS: usize = 3;
const MAX_TREE_DEPTH_LIMIT: usize = 15;

/// Model family selected by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Smooth sigmoid transition around one continuous change point.
    #[default]
    #[serde(alias = "single_change_point")]
    Single,
    /// Hard partition into `k + 1` segments.
    #[serde(alias = "multiple_change_points")]
    Multiple,
}

impl ModelKind {
    pub fn parse(raw: &str) -> Result<Self, BcpdError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "single" | "single_change_point" => Ok(Self::Single),
            "multiple" | "multiple_change_points" => Ok(Self::Multiple),
            _ => Err(BcpdError::config(format!(
                "unknown model type '{raw}'; expected one of: single, multiple"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
        }
    }
}

/// Priors for the smooth single-change-point model. Location priors on `tau`
/// are expressed as fractions of the series length.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinglePriors {
    pub tau_loc_fraction: f64,
    pub tau_scale_fraction: f64,
    pub k_rate: f64,
    pub mu_loc: f64,
    pub mu_scale: f64,
    pub sigma_scale: f64,
}

impl Default for SinglePriors {
    fn default() -> Self {
        Self {
            tau_loc_fraction: 0.5,
            tau_scale_fraction: 0.1,
            k_rate: 0.2,
            mu_loc: 0.0,
            mu_scale: 0.02,
            sigma_scale: 0.05,
        }
    }
}

impl SinglePriors {
    fn validate(&self) -> Result<(), BcpdError> {
        require_finite("single_priors.tau_loc_fraction", self.tau_loc_fraction)?;
        require_finite("single_priors.mu_loc", self.mu_loc)?;
        require_positive("single_priors.tau_scale_fraction", self.tau_scale_fraction)?;
        require_positive("single_priors.k_rate", self.k_rate)?;
        require_positive("single_priors.mu_scale", self.mu_scale)?;
        require_positive("single_priors.sigma_scale", self.sigma_scale)
    }
}

/// Priors for the multiple-change-point model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplePriors {
    pub dirichlet_concentration: f64,
    pub mu_loc: f64,
    pub mu_scale: f64,
    pub sigma_scale: f64,
}

impl Default for MultiplePriors {
    fn default() -> Self {
        Self {
            dirichlet_concentration: 1.0,
            mu_loc: 0.0,
            mu_scale: 1.0,
            sigma_scale: 1.0,
        }
    }
}

impl MultiplePriors {
    fn validate(&self) -> Result<(), BcpdError> {
        require_positive(
            "multiple_priors.dirichlet_concentration",
            self.dirichlet_concentration,
        )?;
        require_finite("multiple_priors.mu_loc", self.mu_loc)?;
        require_positive("multiple_priors.mu_scale", self.mu_scale)?;
        require_positive("multiple_priors.sigma_scale", self.sigma_scale)
    }
}

/// MCMC run settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSettings {
    pub draws: usize,
    pub tune: usize,
    pub chains: usize,
    pub target_accept: f64,
    pub max_tree_depth: usize,
    /// Fraction of retained draws allowed to be divergent before the run fails.
    pub max_divergence_fraction: f64,
    /// Base RNG seed; chain `c` uses `seed + c`. Drawn from OS entropy when absent.
    pub seed: Option<u64>,
    pub cancel_check_every: usize,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            draws: DEFAULT_DRAWS,
            tune: DEFAULT_TUNE,
            chains: DEFAULT_CHAINS,
            target_accept: DEFAULT_TARGET_ACCEPT,
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
            max_divergence_fraction: DEFAULT_MAX_DIVERGENCE_FRACTION,
            seed: None,
            cancel_check_every: DEFAULT_CANCEL_CHECK_EVERY,
        }
    }
}

impl SamplerSettings {
    pub fn validate(&self) -> Result<(), BcpdError> {
        if self.draws == 0 {
            return Err(BcpdError::config("sampling.draws must be >= 1; got 0"));
        }
        if self.chains == 0 {
            return Err(BcpdError::config("sampling.chains must be >= 1; got 0"));
        }
        if !(self.target_accept.is_finite()
            && 0.0 < self.target_accept
            && self.target_accept < 1.0)
        {
            return Err(BcpdError::config(format!(
                "sampling.target_accept must be finite and in (0,1); got {}",
                self.target_accept
            )));
        }
        if self.max_tree_depth == 0 || self.max_tree_depth > MAX_TREE_DEPTH_LIMIT {
            return Err(BcpdError::config(format!(
                "sampling.max_tree_depth must be in 1..={MAX_TREE_DEPTH_LIMIT}; got {}",
                self.max_tree_depth
            )));
        }
        if !(self.max_divergence_fraction.is_finite()
            && (0.0..=1.0).contains(&self.max_divergence_fraction))
        {
            return Err(BcpdError::config(format!(
                "sampling.max_divergence_fraction must be in [0,1]; got {}",
                self.max_divergence_fraction
            )));
        }
        Ok(())
    }

    /// Largest divergence count tolerated across all chains.
    pub fn divergence_tolerance(&self) -> usize {
        let total = (self.draws * self.chains) as f64;
        (total * self.max_divergence_fraction).floor() as usize
    }
}

/// Thresholds used to gate trust in a sampling run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceThresholds {
    pub rhat_threshold: f64,
    pub ess_threshold: f64,
}

impl Default for ConvergenceThresholds {
    fn default() -> Self {
        Self {
            rhat_threshold: DEFAULT_RHAT_THRESHOLD,
            ess_threshold: DEFAULT_ESS_THRESHOLD,
        }
    }
}

impl ConvergenceThresholds {
    pub fn validate(&self) -> Result<(), BcpdError> {
        if !self.rhat_threshold.is_finite() || self.rhat_threshold <= 1.0 {
            return Err(BcpdError::config(format!(
                "convergence.rhat_threshold must be finite and > 1.0; got {}",
                self.rhat_threshold
            )));
        }
        if !self.ess_threshold.is_finite() || self.ess_threshold < 0.0 {
            return Err(BcpdError::config(format!(
                "convergence.ess_threshold must be finite and >= 0; got {}",
                self.ess_threshold
            )));
        }
        Ok(())
    }
}

/// Full run configuration. Treated as immutable once sampling starts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: ModelKind,
    pub n_changepoints: Option<usize>,
    pub single_priors: SinglePriors,
    pub multiple_priors: MultiplePriors,
    pub sampling: SamplerSettings,
    pub convergence: ConvergenceThresholds,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), BcpdError> {
        if self.n_changepoints == Some(0) {
            return Err(BcpdError::config("n_changepoints must be >= 1; got 0"));
        }
        self.single_priors.validate()?;
        self.multiple_priors.validate()?;
        self.sampling.validate()?;
        self.convergence.validate()
    }

    pub fn resolved_n_changepoints(&self) -> usize {
        self.n_changepoints.unwrap_or(DEFAULT_N_CHANGEPOINTS)
    }

    /// Parses and validates a JSON document; missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, BcpdError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| BcpdError::config(format!("invalid model config JSON: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, BcpdError> {
        let raw = std::fs::read_to_string(path).map_err(|err| BcpdError::io(path, err))?;
        Self::from_json_str(&raw)
    }
}

fn require_finite(name: &str, value: f64) -> Result<(), BcpdError> {
    if !value.is_finite() {
        return Err(BcpdError::config(format!("{name} must be finite; got {value}")));
    }
    Ok(())
}

fn require_positive(name: &str, value: f64) -> Result<(), BcpdError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(BcpdError::config(format!(
            "{name} must be finite and > 0; got {value}"
        )));
    }
    Ok(())
}
