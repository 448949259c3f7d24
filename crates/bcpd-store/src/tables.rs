// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Flat CSV renditions of the model summary and the impact reports.

use bcpd_core::BcpdError;
use bcpd_diagnostics::{ModelSummary, ParameterSummary};
use bcpd_posterior::{ImpactReport, Ratio, Resolution, WindowStats};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const UNDEFINED_CELL: &str = "undefined";

#[derive(Debug, Serialize, Deserialize)]
struct SummaryRow {
    parameter: String,
    mean: f64,
    sd: f64,
    #[serde(rename = "hdi_3%")]
    hdi_low: f64,
    #[serde(rename = "hdi_97%")]
    hdi_high: f64,
    mcse_mean: Option<f64>,
    mcse_sd: Option<f64>,
    ess_bulk: Option<f64>,
    ess_tail: Option<f64>,
    r_hat: Option<f64>,
}

impl From<&ParameterSummary> for SummaryRow {
    fn from(row: &ParameterSummary) -> Self {
        Self {
            parameter: row.name.clone(),
            mean: row.mean,
            sd: row.sd,
            hdi_low: row.hdi_low,
            hdi_high: row.hdi_high,
            mcse_mean: row.mcse_mean,
            mcse_sd: row.mcse_sd,
            ess_bulk: row.ess_bulk,
            ess_tail: row.ess_tail,
            r_hat: row.r_hat,
        }
    }
}

impl From<SummaryRow> for ParameterSummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            name: row.parameter,
            mean: row.mean,
            sd: row.sd,
            hdi_low: row.hdi_low,
            hdi_high: row.hdi_high,
            mcse_mean: row.mcse_mean,
            mcse_sd: row.mcse_sd,
            ess_bulk: row.ess_bulk,
            ess_tail: row.ess_tail,
            r_hat: row.r_hat,
        }
    }
}

/// One impact report flattened into a table row. Ratios are written as a
/// number or `undefined`; an absent effect size and the statistics of an
/// empty window are empty cells.
#[derive(Debug, Serialize, Deserialize)]
struct ImpactRow {
    parameter: String,
    change_point_index: usize,
    change_point_date: NaiveDate,
    resolution: Resolution,
    before_mean: Option<f64>,
    before_std: Option<f64>,
    before_n_obs: usize,
    after_mean: Option<f64>,
    after_std: Option<f64>,
    after_n_obs: usize,
    mean_change: Option<f64>,
    percent_change: String,
    volatility_change: Option<f64>,
    effect_size: String,
}

fn parse_ratio(cell: &str, column: &str) -> Result<Ratio, BcpdError> {
    if cell == UNDEFINED_CELL {
        return Ok(Ratio::Undefined);
    }
    cell.parse::<f64>()
        .map(|value| Ratio::new(value, 1.0))
        .map_err(|err| {
            BcpdError::serialization(format!("{column} cell '{cell}' is invalid: {err}"))
        })
}

impl From<&ImpactReport> for ImpactRow {
    fn from(report: &ImpactReport) -> Self {
        Self {
            parameter: report.parameter.clone(),
            change_point_index: report.change_point_index,
            change_point_date: report.change_point_date,
            resolution: report.resolution,
            before_mean: report.before.mean,
            before_std: report.before.std,
            before_n_obs: report.before.n_obs,
            after_mean: report.after.mean,
            after_std: report.after.std,
            after_n_obs: report.after.n_obs,
            mean_change: report.mean_change,
            percent_change: report.percent_change.to_string(),
            volatility_change: report.volatility_change,
            effect_size: report
                .effect_size
                .map(|ratio| ratio.to_string())
                .unwrap_or_default(),
        }
    }
}

impl ImpactRow {
    fn into_report(self) -> Result<ImpactReport, BcpdError> {
        let percent_change = parse_ratio(&self.percent_change, "percent_change")?;
        let effect_size = if self.effect_size.is_empty() {
            None
        } else {
            Some(parse_ratio(&self.effect_size, "effect_size")?)
        };
        Ok(ImpactReport {
            parameter: self.parameter,
            change_point_index: self.change_point_index,
            change_point_date: self.change_point_date,
            resolution: self.resolution,
            before: WindowStats {
                mean: self.before_mean,
                std: self.before_std,
                n_obs: self.before_n_obs,
            },
            after: WindowStats {
                mean: self.after_mean,
                std: self.after_std,
                n_obs: self.after_n_obs,
            },
            mean_change: self.mean_change,
            percent_change,
            volatility_change: self.volatility_change,
            effect_size,
        })
    }
}

fn write_rows<R: Serialize>(rows: impl IntoIterator<Item = R>) -> Result<Vec<u8>, BcpdError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| {
                BcpdError::serialization(format!("csv row serialization failed: {err}"))
            })?;
    }
    writer
        .into_inner()
        .map_err(|err| BcpdError::serialization(format!("csv flush failed: {err}")))
}

fn read_rows<R: DeserializeOwned>(encoded: &[u8]) -> Result<Vec<R>, BcpdError> {
    csv::Reader::from_reader(encoded)
        .deserialize()
        .collect::<Result<Vec<R>, _>>()
        .map_err(|err| BcpdError::serialization(format!("csv row parse failed: {err}")))
}

/// `model_summary.csv` bytes, one row per parameter.
pub fn encode_model_summary(summary: &ModelSummary) -> Result<Vec<u8>, BcpdError> {
    write_rows(summary.rows.iter().map(SummaryRow::from))
}

pub fn decode_model_summary(encoded: &[u8]) -> Result<ModelSummary, BcpdError> {
    let rows = read_rows::<SummaryRow>(encoded)?;
    Ok(ModelSummary {
        rows: rows.into_iter().map(ParameterSummary::from).collect(),
    })
}

/// `impact_analysis.csv` bytes, one row per change point.
pub fn encode_impact_table(reports: &[ImpactReport]) -> Result<Vec<u8>, BcpdError> {
    write_rows(reports.iter().map(ImpactRow::from))
}

pub fn decode_impact_table(encoded: &[u8]) -> Result<Vec<ImpactReport>, BcpdError> {
    read_rows::<ImpactRow>(encoded)?
        .into_iter()
        .map(ImpactRow::into_report)
        .collect()
}
