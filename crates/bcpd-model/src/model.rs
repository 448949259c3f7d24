// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::{ModelConfig, ModelKind};
use crate::multiple::MultipleChangePointModel;
use crate::single::SingleChangePointModel;
use bcpd_core::BcpdError;
use tracing::info;

/// Log-density contract shared by every change-point model.
///
/// Parameters live in an unconstrained real space of dimension [`dim`](Self::dim);
/// `log_density` includes the log-Jacobian of the constraining transforms.
/// [`constrain`](Self::constrain) maps a point to the named values recorded in
/// the trace, aligned with [`parameter_names`](Self::parameter_names).
pub trait GenerativeModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn n_obs(&self) -> usize;

    fn dim(&self) -> usize;

    fn log_density(&self, theta: &[f64]) -> f64;

    fn supports_gradient(&self) -> bool {
        false
    }

    /// Writes the gradient into `grad` and returns the log density, or `None`
    /// when the model is not differentiable.
    fn log_density_gradient(&self, _theta: &[f64], _grad: &mut [f64]) -> Option<f64> {
        None
    }

    fn initial_point(&self) -> Vec<f64>;

    /// Typical per-coordinate scale in unconstrained space, used for jitter and
    /// as the starting proposal / metric scale.
    fn initial_scales(&self) -> Vec<f64>;

    fn parameter_names(&self) -> Vec<String>;

    fn constrain(&self, theta: &[f64]) -> Vec<f64>;
}

/// Model selected at build time.
#[derive(Clone, Debug)]
pub enum ModelHandle {
    Single(SingleChangePointModel),
    Multiple(MultipleChangePointModel),
}

impl GenerativeModel for ModelHandle {
    fn kind(&self) -> ModelKind {
        match self {
            Self::Single(m) => m.kind(),
            Self::Multiple(m) => m.kind(),
        }
    }

    fn n_obs(&self) -> usize {
        match self {
            Self::Single(m) => m.n_obs(),
            Self::Multiple(m) => m.n_obs(),
        }
    }

    fn dim(&self) -> usize {
        match self {
            Self::Single(m) => m.dim(),
            Self::Multiple(m) => m.dim(),
        }
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        match self {
            Self::Single(m) => m.log_density(theta),
            Self::Multiple(m) => m.log_density(theta),
        }
    }

    fn supports_gradient(&self) -> bool {
        match self {
            Self::Single(m) => m.supports_gradient(),
            Self::Multiple(m) => m.supports_gradient(),
        }
    }

    fn log_density_gradient(&self, theta: &[f64], grad: &mut [f64]) -> Option<f64> {
        match self {
            Self::Single(m) => m.log_density_gradient(theta, grad),
            Self::Multiple(m) => m.log_density_gradient(theta, grad),
        }
    }

    fn initial_point(&self) -> Vec<f64> {
        match self {
            Self::Single(m) => m.initial_point(),
            Self::Multiple(m) => m.initial_point(),
        }
    }

    fn initial_scales(&self) -> Vec<f64> {
        match self {
            Self::Single(m) => m.initial_scales(),
            Self::Multiple(m) => m.initial_scales(),
        }
    }

    fn parameter_names(&self) -> Vec<String> {
        match self {
            Self::Single(m) => m.parameter_names(),
            Self::Multiple(m) => m.parameter_names(),
        }
    }

    fn constrain(&self, theta: &[f64]) -> Vec<f64> {
        match self {
            Self::Single(m) => m.constrain(theta),
            Self::Multiple(m) => m.constrain(theta),
        }
    }
}

/// Binds observations and priors, then builds a model by type name.
#[derive(Clone, Debug)]
pub struct ModelBuilder<'a> {
    data: &'a [f64],
    config: &'a ModelConfig,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(data: &'a [f64], config: &'a ModelConfig) -> Self {
        Self { data, config }
    }

    /// Builds `model_type` (`single` or `multiple`); `n_changepoints` falls back
    /// to the configured value for the multiple variant.
    pub fn build(
        &self,
        model_type: &str,
        n_changepoints: Option<usize>,
    ) -> Result<ModelHandle, BcpdError> {
        let kind = ModelKind::parse(model_type)?;
        self.build_kind(kind, n_changepoints)
    }

    pub fn build_kind(
        &self,
        kind: ModelKind,
        n_changepoints: Option<usize>,
    ) -> Result<ModelHandle, BcpdError> {
        self.config.validate()?;
        let handle = match kind {
            ModelKind::Single => ModelHandle::Single(SingleChangePointModel::new(
                self.data.to_vec(),
                self.config.single_priors.clone(),
            )?),
            ModelKind::Multiple => {
                let k = n_changepoints.unwrap_or_else(|| self.config.resolved_n_changepoints());
                ModelHandle::Multiple(MultipleChangePointModel::new(
                    self.data.to_vec(),
                    k,
                    self.config.multiple_priors.clone(),
                )?)
            }
        };
        info!(
            model = kind.as_str(),
            n_obs = handle.n_obs(),
            dim = handle.dim(),
            "built change-point model"
        );
        Ok(handle)
    }

    /// Builds the model named in the configuration.
    pub fn build_configured(&self) -> Result<ModelHandle, BcpdError> {
        self.build_kind(self.config.model, self.config.n_changepoints)
    }
}

pub(crate) fn normal_log_pdf(x: f64, loc: f64, scale: f64) -> f64 {
    let z = (x - loc) / scale;
    -0.5 * z * z - scale.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln()
}

pub(crate) fn half_normal_log_pdf(x: f64, scale: f64) -> f64 {
    if x < 0.0 {
        return f64::NEG_INFINITY;
    }
    let z = x / scale;
    0.5 * (2.0 / std::f64::consts::PI).ln() - scale.ln() - 0.5 * z * z
}

pub(crate) fn exponential_log_pdf(x: f64, rate: f64) -> f64 {
    if x < 0.0 {
        return f64::NEG_INFINITY;
    }
    rate.ln() - rate * x
}

#[cfg(test)]
mod tests {
    use super::{GenerativeModel, ModelBuilder, ModelHandle};
    use crate::config::{ModelConfig, ModelKind};

    #[test]
    fn builder_dispatches_on_model_type() {
        let data = vec![0.0; 50];
        let config = ModelConfig::default();
        let builder = ModelBuilder::new(&data, &config);

        let single = builder.build("single", None).expect("single should build");
        assert!(matches!(single, ModelHandle::Single(_)));
        assert_eq!(single.kind(), ModelKind::Single);
        assert!(single.supports_gradient());

        let multiple = builder.build("multiple", Some(2)).expect("multiple should build");
        assert_eq!(multiple.kind(), ModelKind::Multiple);
        assert!(!multiple.supports_gradient());
        assert_eq!(multiple.dim(), 2 + 3 + 1);
    }

    #[test]
    fn builder_rejects_unknown_model_type() {
        let data = vec![0.0; 50];
        let config = ModelConfig::default();
        let err = ModelBuilder::new(&data, &config)
            .build("hidden_markov", None)
            .expect_err("unknown type must fail");
        assert_eq!(err.code(), "config_error");
    }

    #[test]
    fn builder_rejects_zero_change_points() {
        let data = vec![0.0; 50];
        let config = ModelConfig::default();
        let err = ModelBuilder::new(&data, &config)
            .build("multiple", Some(0))
            .expect_err("zero change points must fail");
        assert_eq!(err.code(), "config_error");
    }
}
