#![deny(warnings)]

//! Collaborator boundary: normalised row records in, typed tables out.
//!
//! Upstream parsers deliver rows in the shapes declared here (JSON lines in
//! practice); this crate assembles them into the core stores with full
//! invariant checking, and loads the closed `Parameters` record from YAML.
//! Nothing in here knows about spreadsheets or on-disk layouts.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use htm_core::{
    AnnualData, Datum, FundingFraction, FundingTable, Gp, IndicatorName, Iso3, ModelResults,
    Parameters, ScenarioDescriptor, Year, YearRange,
};

/// Explicit paths threaded through constructors instead of global state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Environment {
    /// Normalised input tables.
    pub data_dir: PathBuf,
    /// Session snapshots of previously loaded databases.
    pub session_dir: PathBuf,
    /// Report and export output.
    pub output_dir: PathBuf,
}

impl Environment {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        session_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            session_dir: session_dir.into(),
            output_dir: output_dir.into(),
        }
    }
}

/// One model-output row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelResultRow {
    pub scenario: String,
    pub funding_fraction: f64,
    pub country: String,
    pub year: Year,
    pub indicator: String,
    pub low: f64,
    pub central: f64,
    pub high: f64,
}

/// One reference-series row (partner data, programmatic-funding inputs).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnnualDataRow {
    pub scenario: String,
    pub country: String,
    pub year: Year,
    pub indicator: String,
    pub central: f64,
}

/// One funding row: a country and its dollar amount over the window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FundingRow {
    pub country: String,
    pub cost: Decimal,
}

/// One exogenous global-plan row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpRow {
    pub country: String,
    pub indicator: String,
    pub year: Year,
    pub value: f64,
}

/// Parses newline-delimited JSON records, one per line; blank lines skipped.
pub fn rows_from_json_lines<T: DeserializeOwned>(text: &str) -> Result<Vec<T>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("record on line {}", n + 1))
        })
        .collect()
}

pub fn build_model_results(rows: &[ModelResultRow]) -> Result<ModelResults> {
    let mut store = ModelResults::new();
    for row in rows {
        let country = Iso3::new(row.country.clone())?;
        let fraction = FundingFraction::new(row.funding_fraction)?;
        let datum = Datum::new(row.low, row.central, row.high)?;
        store.insert(
            ScenarioDescriptor::new(row.scenario.clone()),
            country,
            fraction,
            IndicatorName::new(row.indicator.clone()),
            row.year,
            datum,
        )?;
    }
    info!(rows = rows.len(), "model results assembled");
    Ok(store)
}

pub fn build_annual_data(rows: &[AnnualDataRow]) -> Result<AnnualData> {
    let mut store = AnnualData::new();
    for row in rows {
        store.insert(
            ScenarioDescriptor::new(row.scenario.clone()),
            Iso3::new(row.country.clone())?,
            IndicatorName::new(row.indicator.clone()),
            row.year,
            row.central,
        )?;
    }
    Ok(store)
}

pub fn build_funding(rows: &[FundingRow], window: YearRange) -> Result<FundingTable> {
    let mut table = FundingTable::new(window);
    for row in rows {
        table.insert(Iso3::new(row.country.clone())?, row.cost)?;
    }
    Ok(table)
}

pub fn build_fixed_gp(rows: &[GpRow]) -> Result<Gp> {
    let mut gp = Gp::new();
    for row in rows {
        gp.insert(
            Iso3::new(row.country.clone())?,
            IndicatorName::new(row.indicator.clone()),
            row.year,
            row.value,
        )?;
    }
    Ok(gp)
}

/// Loads the closed parameter record; unknown keys are rejected.
pub fn parameters_from_yaml(text: &str) -> Result<Parameters> {
    let parameters: Parameters =
        serde_yaml::from_str(text).context("parameter file does not match the expected schema")?;
    parameters.validate()?;
    Ok(parameters)
}
