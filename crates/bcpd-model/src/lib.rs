// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod config;
pub mod model;
pub mod multiple;
pub mod single;

pub use config::{
    ConvergenceThresholds, ModelConfig, ModelKind, MultiplePriors, SamplerSettings, SinglePriors,
};
pub use model::{GenerativeModel, ModelBuilder, ModelHandle};
pub use multiple::{
    MultipleChangePointModel, MultipleParams, changepoints_from_fractions, segment_assignment,
    segment_of, stick_breaking_log,
};
pub use single::{SingleChangePointModel, SingleParams};

/// Change-point models and run configuration for bcpd.
pub fn crate_name() -> &'static str {
    "bcpd-model"
}
