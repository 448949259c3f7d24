// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::BcpdError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Chronologically ordered observations with a one-to-one date index.
///
/// Deserialization runs the same checks as [`ObservationSeries::new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesFields")]
pub struct ObservationSeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct SeriesFields {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl TryFrom<SeriesFields> for ObservationSeries {
    type Error = BcpdError;

    fn try_from(fields: SeriesFields) -> Result<Self, Self::Error> {
        Self::new(fields.dates, fields.values)
    }
}

impl ObservationSeries {
    /// Constructs a validated series: equal lengths, strictly increasing dates, finite values.
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self, BcpdError> {
        if dates.is_empty() {
            return Err(BcpdError::invalid_input("observation series must be non-empty"));
        }
        if dates.len() != values.len() {
            return Err(BcpdError::invalid_input(format!(
                "date/value length mismatch: dates={}, values={}",
                dates.len(),
                values.len()
            )));
        }
        if let Some(idx) = dates.windows(2).position(|pair| pair[0] >= pair[1]) {
            return Err(BcpdError::invalid_input(format!(
                "dates must be strictly increasing: index {} ({}) is not after index {} ({})",
                idx + 1,
                dates[idx + 1],
                idx,
                dates[idx]
            )));
        }
        if let Some((idx, value)) = values
            .iter()
            .copied()
            .enumerate()
            .find(|(_, v)| !v.is_finite())
        {
            return Err(BcpdError::invalid_input(format!(
                "observation at index {idx} is not finite: {value}"
            )));
        }
        Ok(Self { dates, values })
    }

    /// Builds a series over consecutive days starting at `start`.
    pub fn from_daily(start: NaiveDate, values: Vec<f64>) -> Result<Self, BcpdError> {
        let dates = start
            .iter_days()
            .take(values.len())
            .collect::<Vec<_>>();
        Self::new(dates, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Clamps a (possibly out-of-range) sample index into `[0, n-1]`.
    pub fn clamp_index(&self, index: i64) -> usize {
        let last = self.len() - 1;
        if index <= 0 {
            0
        } else {
            usize::try_from(index).map_or(last, |idx| idx.min(last))
        }
    }

    /// Maps a sample index to its calendar date, clamping into the series range.
    pub fn date_at(&self, index: i64) -> NaiveDate {
        self.dates[self.clamp_index(index)]
    }

    /// Returns `(before, after)` windows `[index-before, index)` and `[index, index+after)`,
    /// clipped to the series bounds.
    pub fn split_windows(&self, index: usize, before: usize, after: usize) -> (&[f64], &[f64]) {
        let index = index.min(self.len());
        let start = index.saturating_sub(before);
        let end = index.saturating_add(after).min(self.len());
        (&self.values[start..index], &self.values[index..end])
    }
}

/// One raw price observation as supplied by the loading collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub price: Option<f64>,
}

/// Return transform applied to a cleaned price series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    /// `ln(p_t) - ln(p_{t-1})`.
    #[default]
    Log,
    /// `(p_t - p_{t-1}) / p_{t-1}`.
    Simple,
}

/// Counters describing what cleaning changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub input_rows: usize,
    pub duplicate_dates_removed: usize,
    pub missing_forward_filled: usize,
    pub leading_missing_dropped: usize,
    pub non_positive_removed: usize,
}

/// Cleaned price series plus its derived return series.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedSeries {
    pub prices: ObservationSeries,
    pub returns: ObservationSeries,
    pub report: CleaningReport,
}

/// Sorts by date, drops duplicate dates (first occurrence wins), forward-fills
/// missing prices, removes non-positive prices.
pub fn clean_prices(
    records: &[PriceRecord],
) -> Result<(ObservationSeries, CleaningReport), BcpdError> {
    let mut report = CleaningReport {
        input_rows: records.len(),
        ..CleaningReport::default()
    };

    let mut by_date: BTreeMap<NaiveDate, Option<f64>> = BTreeMap::new();
    for record in records {
        let price = record.price.filter(|p| p.is_finite());
        if by_date.contains_key(&record.date) {
            report.duplicate_dates_removed += 1;
            continue;
        }
        by_date.insert(record.date, price);
    }

    let mut dates = Vec::with_capacity(by_date.len());
    let mut prices = Vec::with_capacity(by_date.len());
    let mut last_seen: Option<f64> = None;
    for (date, price) in by_date {
        let value = match (price, last_seen) {
            (Some(p), _) => p,
            (None, Some(prev)) => {
                report.missing_forward_filled += 1;
                prev
            }
            (None, None) => {
                report.leading_missing_dropped += 1;
                continue;
            }
        };
        last_seen = Some(value);
        if value <= 0.0 {
            report.non_positive_removed += 1;
            continue;
        }
        dates.push(date);
        prices.push(value);
    }

    if report.non_positive_removed > 0 {
        warn!(
            removed = report.non_positive_removed,
            "dropped non-positive prices"
        );
    }

    let series = ObservationSeries::new(dates, prices)?;
    info!(
        input_rows = report.input_rows,
        kept = series.len(),
        duplicates = report.duplicate_dates_removed,
        forward_filled = report.missing_forward_filled,
        "cleaned price series"
    );
    Ok((series, report))
}

/// Derives the return series; the first date is consumed by differencing.
pub fn compute_returns(
    prices: &ObservationSeries,
    kind: ReturnKind,
) -> Result<ObservationSeries, BcpdError> {
    if prices.len() < 2 {
        return Err(BcpdError::insufficient_data(format!(
            "returns need at least 2 prices; got {}",
            prices.len()
        )));
    }
    let values = prices
        .values()
        .windows(2)
        .map(|pair| match kind {
            ReturnKind::Log => pair[1].ln() - pair[0].ln(),
            ReturnKind::Simple => (pair[1] - pair[0]) / pair[0],
        })
        .collect::<Vec<_>>();
    ObservationSeries::new(prices.dates()[1..].to_vec(), values)
}

/// Full preparation step: clean, then derive returns.
pub fn prepare_series(
    records: &[PriceRecord],
    kind: ReturnKind,
) -> Result<PreparedSeries, BcpdError> {
    let (prices, report) = clean_prices(records)?;
    let returns = compute_returns(&prices, kind)?;
    Ok(PreparedSeries {
        prices,
        returns,
        report,
    })
}
