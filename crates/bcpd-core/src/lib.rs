// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod context;
pub mod control;
pub mod error;
pub mod numeric;
pub mod series;

pub use context::ExecutionContext;
pub use control::{CancelToken, ProgressSink};
pub use error::{BcpdError, BcpdResult};
pub use series::{
    CleaningReport, ObservationSeries, PreparedSeries, PriceRecord, ReturnKind, clean_prices,
    compute_returns, prepare_series,
};

/// Core shared types and errors for bcpd.
pub fn crate_name() -> &'static str {
    "bcpd-core"
}
