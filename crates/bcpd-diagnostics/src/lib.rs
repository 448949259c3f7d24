// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod convergence;
pub mod stats;
pub mod summary;

pub use convergence::{ConvergenceReport, diagnose, diagnose_with_summary};
pub use summary::{ModelSummary, ParameterSummary, SUMMARY_HDI_PROB, summarize, summarize_parameter};

/// Convergence diagnostics for bcpd traces.
pub fn crate_name() -> &'static str {
    "bcpd-diagnostics"
}
