// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Temporal proximity between change points and catalogued events.
//!
//! Proximity is reported as a signed day offset only; it is not evidence that
//! an event caused the change.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearbyEvent {
    pub event: Event,
    /// `event.date - change_point_date` in days.
    pub offset_days: i64,
}

/// The `n` events closest to `date` by absolute day distance, returned in
/// calendar order. Distance ties keep catalogue order.
pub fn nearest_events(date: NaiveDate, events: &[Event], n: usize) -> Vec<NearbyEvent> {
    let mut nearby: Vec<NearbyEvent> = events
        .iter()
        .map(|event| NearbyEvent {
            offset_days: (event.date - date).num_days(),
            event: event.clone(),
        })
        .collect();
    nearby.sort_by_key(|item| item.offset_days.unsigned_abs());
    nearby.truncate(n);
    nearby.sort_by_key(|item| item.event.date);
    nearby
}
