// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod events;
pub mod impact;
pub mod summarizer;

pub use events::{Event, NearbyEvent, nearest_events};
pub use impact::{
    ImpactConfig, ImpactReport, Ratio, Resolution, WindowStats, analyze_impact, impact_at,
};
pub use summarizer::{
    CHANGE_POINT_HDI_PROB, ChangePointEstimate, ChangePointPosterior, estimate_change_point, hdi,
    mode_of_rounded, summarize_change_points, tau_dates,
};

/// Change-point estimates and impact statistics for bcpd.
pub fn crate_name() -> &'static str {
    "bcpd-posterior"
}
