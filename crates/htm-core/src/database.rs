//! Per-disease data assembly: model output, reference series and the
//! global-plan trajectory behind one read-only handle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    DataError, Datum, FundingFraction, IndicatorName, Iso3, ModelResults, PFInputData,
    PartnerData, ScenarioDescriptor, Year,
};

/// Target trajectory per (country, indicator, year).
///
/// Built either from an exogenous table or derived from model results at
/// full funding; derived instances hold plain values, never handles back
/// into their inputs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Gp {
    trajectories: BTreeMap<Iso3, BTreeMap<IndicatorName, BTreeMap<Year, f64>>>,
}

impl Gp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        country: Iso3,
        indicator: IndicatorName,
        year: Year,
        value: f64,
    ) -> Result<(), DataError> {
        let slot = self
            .trajectories
            .entry(country.clone())
            .or_default()
            .entry(indicator.clone())
            .or_default();
        if slot.contains_key(&year) {
            return Err(DataError::Duplicate(format!("{country}/{indicator}/{year}")));
        }
        slot.insert(year, value);
        Ok(())
    }

    /// Derives the trajectory from model central estimates at full funding.
    pub fn from_model_at_full_funding(
        model: &ModelResults,
        scenario: &ScenarioDescriptor,
        indicators: &[IndicatorName],
    ) -> Result<Self, DataError> {
        let mut gp = Gp::new();
        for country in model.countries() {
            let frame = model.frame(scenario, &country, FundingFraction::ONE)?;
            for indicator in indicators {
                if let Ok(series) = frame.series(indicator) {
                    for (year, datum) in series {
                        gp.insert(country.clone(), indicator.clone(), *year, datum.central)?;
                    }
                }
            }
        }
        Ok(gp)
    }

    /// Overlays exogenous targets on top of this trajectory; fixed entries win.
    pub fn overlaid_with(mut self, fixed: Gp) -> Gp {
        for (country, by_indicator) in fixed.trajectories {
            for (indicator, series) in by_indicator {
                let slot = self
                    .trajectories
                    .entry(country.clone())
                    .or_default()
                    .entry(indicator)
                    .or_default();
                for (year, value) in series {
                    slot.insert(year, value);
                }
            }
        }
        self
    }

    pub fn series(
        &self,
        country: &Iso3,
        indicator: &IndicatorName,
    ) -> Result<&BTreeMap<Year, f64>, DataError> {
        self.trajectories
            .get(country)
            .and_then(|by_indicator| by_indicator.get(indicator))
            .ok_or_else(|| DataError::NotFound(format!("gp for {country}/{indicator}")))
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }
}

/// One year of assembled country data across all sources.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinedRow {
    pub model: Datum,
    pub pf: Option<f64>,
    pub partner: Option<f64>,
}

/// All data related to a single disease.
///
/// Inputs are immutable after construction; derived artefacts (emulators,
/// filtered curves, projections) are created fresh per analysis run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Database {
    pub model_results: ModelResults,
    pub partner_data: PartnerData,
    pub pf_input_data: PFInputData,
    pub gp: Gp,
}

impl Database {
    pub fn new(
        model_results: ModelResults,
        partner_data: PartnerData,
        pf_input_data: PFInputData,
        gp: Gp,
    ) -> Self {
        Self {
            model_results,
            partner_data,
            pf_input_data,
            gp,
        }
    }

    /// Assembles model, programmatic-funding and partner values for one
    /// (scenario, funding fraction, country, indicator) into a year-indexed
    /// frame. Reference sources that lack the indicator yield `None`s.
    pub fn get_country(
        &self,
        scenario: &ScenarioDescriptor,
        funding_fraction: FundingFraction,
        country: &Iso3,
        indicator: &IndicatorName,
    ) -> Result<BTreeMap<Year, CombinedRow>, DataError> {
        let model = self
            .model_results
            .series(scenario, country, funding_fraction, indicator)?;
        let pf = self
            .pf_input_data
            .series(scenario, country, indicator)
            .ok();
        let partner = self
            .partner_data
            .series(scenario, country, indicator)
            .ok();

        Ok(model
            .iter()
            .map(|(year, datum)| {
                (
                    *year,
                    CombinedRow {
                        model: *datum,
                        pf: pf.and_then(|s| s.get(year).copied()),
                        partner: partner.and_then(|s| s.get(year).copied()),
                    },
                )
            })
            .collect())
    }
}
