// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Thin CSV price loader: a `date` column and a `price` column, any order,
//! headers matched case-insensitively. Cleaning happens downstream.

use bcpd_core::{BcpdError, PriceRecord};
use chrono::NaiveDate;
use std::io::Read;
use std::path::Path;
use tracing::info;

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d-%b-%y", "%d-%b-%Y", "%b %d, %Y", "%d/%m/%Y"];

fn parse_date(raw: &str, row: usize) -> Result<NaiveDate, BcpdError> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .ok_or_else(|| {
            BcpdError::invalid_input(format!(
                "CSV row {row} date '{raw}' matches none of: {}",
                DATE_FORMATS.join(", ")
            ))
        })
}

fn parse_price(raw: &str, row: usize) -> Result<Option<f64>, BcpdError> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") || raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    raw.parse::<f64>().map(Some).map_err(|err| {
        BcpdError::invalid_input(format!("CSV row {row} price '{raw}' is not numeric: {err}"))
    })
}

fn column(headers: &csv::StringRecord, name: &str) -> Result<usize, BcpdError> {
    headers
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| BcpdError::invalid_input(format!("CSV input has no '{name}' column")))
}

/// Reads price records from any CSV source. Missing prices become `None`.
pub fn read_price_records<R: Read>(source: R) -> Result<Vec<PriceRecord>, BcpdError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(source);
    let headers = reader
        .headers()
        .map_err(|err| BcpdError::invalid_input(format!("CSV header is unreadable: {err}")))?
        .clone();
    let date_col = column(&headers, "date")?;
    let price_col = column(&headers, "price")?;

    let mut records = Vec::new();
    for (offset, row) in reader.records().enumerate() {
        let line = offset + 2;
        let row = row.map_err(|err| {
            BcpdError::invalid_input(format!("CSV row {line} is malformed: {err}"))
        })?;
        let date = parse_date(row.get(date_col).unwrap_or_default(), line)?;
        let price = parse_price(row.get(price_col).unwrap_or_default(), line)?;
        records.push(PriceRecord { date, price });
    }
    if records.is_empty() {
        return Err(BcpdError::insufficient_data("CSV input has no data rows"));
    }
    Ok(records)
}

pub fn load_price_csv(path: &Path) -> Result<Vec<PriceRecord>, BcpdError> {
    let file = std::fs::File::open(path).map_err(|err| BcpdError::io(path, err))?;
    let records = read_price_records(file)?;
    info!(path = %path.display(), rows = records.len(), "loaded price records");
    Ok(records)
}
