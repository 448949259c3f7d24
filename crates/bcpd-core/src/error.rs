// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use std::path::PathBuf;
use thiserror::Error;

/// Shared error type for every stage of the change-point pipeline.
#[derive(Error, Debug)]
pub enum BcpdError {
    /// Invalid model type, window or threshold configuration. Raised before sampling.
    #[error("config error: {0}")]
    Config(String),

    /// Input data violates a structural requirement (ordering, finiteness, length).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Chain initialization failure, excessive divergences or numerical instability.
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Diagnostics fell below the configured thresholds and the caller asked for strictness.
    #[error("convergence failure: {0}")]
    ConvergenceFailure(String),

    /// The trace does not carry the variables the summarizer expects.
    #[error("posterior error: {0}")]
    Posterior(String),

    /// A statistics window is empty after clipping to the series bounds.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BcpdError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn sampling(msg: impl Into<String>) -> Self {
        Self::Sampling(msg.into())
    }

    pub fn convergence_failure(msg: impl Into<String>) -> Self {
        Self::ConvergenceFailure(msg.into())
    }

    pub fn posterior(msg: impl Into<String>) -> Self {
        Self::Posterior(msg.into())
    }

    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Stable machine-readable code used in structured error output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::InvalidInput(_) => "invalid_input",
            Self::Sampling(_) => "sampling_error",
            Self::ConvergenceFailure(_) => "convergence_failure",
            Self::Posterior(_) => "posterior_error",
            Self::InsufficientData(_) => "insufficient_data",
            Self::Cancelled => "cancelled",
            Self::Io { .. } => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Configuration and structural errors abort a run immediately.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ConvergenceFailure(_))
    }
}

pub type BcpdResult<T> = Result<T, BcpdError>;

#[cfg(test)]
mod tests {
    use super::BcpdError;

    #[test]
    fn display_includes_category_prefix() {
        assert_eq!(
            BcpdError::config("unknown model type 'foo'").to_string(),
            "config error: unknown model type 'foo'"
        );
        assert_eq!(BcpdError::cancelled().to_string(), "cancelled");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(BcpdError::sampling("x").code(), "sampling_error");
        assert_eq!(BcpdError::posterior("x").code(), "posterior_error");
        assert_eq!(
            BcpdError::io("/tmp/x", std::io::Error::other("boom")).code(),
            "io_error"
        );
    }

    #[test]
    fn convergence_failure_is_the_only_non_fatal_error() {
        assert!(!BcpdError::convergence_failure("rhat").is_fatal());
        assert!(BcpdError::config("bad").is_fatal());
        assert!(BcpdError::posterior("missing tau").is_fatal());
    }
}
