//! Row-oriented report adapter.
//!
//! Produces named measures as labelled scalars or column-declared tables;
//! rendering to workbook formats happens downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use htm_core::{IndicatorName, Parameters};

use crate::analysis::SetOfPortfolioProjections;
use crate::counterfactual::averted;

/// One named measure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReportValue {
    Scalar { label: String, value: f64 },
    /// Free-text run metadata.
    Note(String),
    Table {
        columns: Vec<String>,
        rows: Vec<(String, Vec<f64>)>,
    },
}

/// An ordered collection of named measures, stamped at creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    sections: Vec<(String, ReportValue)>,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            sections: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: ReportValue) {
        self.sections.push((name.into(), value));
    }

    pub fn sections(&self) -> impl Iterator<Item = &(String, ReportValue)> {
        self.sections.iter()
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.sections.iter().find_map(|(n, v)| match v {
            ReportValue::Scalar { value, .. } if n == name => Some(*value),
            _ => None,
        })
    }

    /// The standard measures for one set of projections.
    pub fn from_projections(set: &SetOfPortfolioProjections, parameters: &Parameters) -> Report {
        let mut report = Report::new();
        let horizon = parameters.horizon();
        let span = format!("{}_{}", horizon.first, horizon.last);

        for indicator in [IndicatorName::cases(), IndicatorName::deaths()] {
            let total: f64 = set
                .ic
                .central_series(&indicator)
                .iter()
                .filter(|(year, _)| horizon.contains(**year))
                .map(|(_, v)| v)
                .sum();
            report.push(
                format!("total_{indicator}_{span}"),
                ReportValue::Scalar {
                    label: format!("Total {indicator}, {span}"),
                    value: total,
                },
            );
        }

        let deaths_averted = averted(&set.cf_lives_saved, &set.ic, &IndicatorName::deaths());
        report.push(
            format!("deaths_averted_{span}"),
            ReportValue::Scalar {
                label: format!("Deaths averted vs null, {span}"),
                value: deaths_averted.values().map(|d| d.central).sum(),
            },
        );
        let cases_averted = averted(
            &set.cf_infections_averted,
            &set.ic,
            &IndicatorName::cases(),
        );
        report.push(
            format!("cases_averted_{span}"),
            ReportValue::Scalar {
                label: format!("Cases averted vs constant coverage, {span}"),
                value: cases_averted.values().map(|d| d.central).sum(),
            },
        );

        // Per-country funding split.
        let funding_rows: Vec<(String, Vec<f64>)> = set
            .ic
            .tgf_funding_by_country
            .iter()
            .map(|(country, tgf)| {
                let non_tgf = set
                    .ic
                    .non_tgf_funding_by_country
                    .get(country)
                    .copied()
                    .unwrap_or(0.0);
                (country.to_string(), vec![*tgf, non_tgf, tgf + non_tgf])
            })
            .collect();
        report.push(
            "funding_by_country",
            ReportValue::Table {
                columns: vec!["tgf".to_string(), "non_tgf".to_string(), "total".to_string()],
                rows: funding_rows,
            },
        );

        // Central portfolio trajectories, one row per indicator.
        let years: Vec<i32> = horizon.iter().collect();
        let trajectory_rows: Vec<(String, Vec<f64>)> = set
            .ic
            .portfolio
            .iter()
            .map(|(indicator, series)| {
                (
                    indicator.to_string(),
                    years
                        .iter()
                        .map(|y| series.get(y).map(|d| d.central).unwrap_or(0.0))
                        .collect(),
                )
            })
            .collect();
        report.push(
            "portfolio_trajectories",
            ReportValue::Table {
                columns: years.iter().map(|y| y.to_string()).collect(),
                rows: trajectory_rows,
            },
        );

        for (key, value) in &set.info {
            report.push(format!("info_{key}"), ReportValue::Note(value.clone()));
        }

        report
    }
}
