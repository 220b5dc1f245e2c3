//! Multi-index tabular stores.
//!
//! Rows are held in nested ordered maps so that any leading subset of the
//! index resolves to a sub-view without scanning: scenario, then country,
//! then funding fraction, then indicator, then year. Stores are immutable
//! once an analysis run starts; readers need no locking.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    DataError, Datum, FundingFraction, IndicatorName, Iso3, ScenarioDescriptor, ValidationError,
    Year, YearRange,
};

/// Year-indexed values for a single indicator.
pub type YearSeries = BTreeMap<Year, Datum>;

/// A country's trajectory at one operating point: indicator -> year -> datum.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorFrame {
    series: BTreeMap<IndicatorName, YearSeries>,
}

impl IndicatorFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        indicator: IndicatorName,
        year: Year,
        datum: Datum,
    ) -> Result<(), DataError> {
        let slot = self.series.entry(indicator.clone()).or_default();
        if slot.contains_key(&year) {
            return Err(DataError::Duplicate(format!("{indicator}/{year}")));
        }
        slot.insert(year, datum);
        Ok(())
    }

    pub fn series(&self, indicator: &IndicatorName) -> Result<&YearSeries, DataError> {
        self.series
            .get(indicator)
            .ok_or_else(|| DataError::NotFound(format!("indicator {indicator}")))
    }

    pub fn get(&self, indicator: &IndicatorName, year: Year) -> Result<Datum, DataError> {
        self.series(indicator)?
            .get(&year)
            .copied()
            .ok_or_else(|| DataError::NotFound(format!("{indicator}/{year}")))
    }

    pub fn indicators(&self) -> impl Iterator<Item = &IndicatorName> {
        self.series.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndicatorName, &YearSeries)> {
        self.series.iter()
    }

    /// Sum of the central statistic for one indicator over a year window.
    pub fn total(&self, indicator: &IndicatorName, years: &YearRange) -> Result<f64, DataError> {
        let series = self.series(indicator)?;
        Ok(years
            .iter()
            .filter_map(|y| series.get(&y))
            .map(|d| d.central)
            .sum())
    }

    /// Multiplies every year of one indicator by a non-negative factor.
    /// Absent indicators are left untouched.
    pub fn scale_indicator(&mut self, indicator: &IndicatorName, factor: f64) {
        if let Some(series) = self.series.get_mut(indicator) {
            for datum in series.values_mut() {
                *datum = datum.scaled(factor);
            }
        }
    }

    /// Multiplies a single (indicator, year) cell by a non-negative factor.
    pub fn scale_value(&mut self, indicator: &IndicatorName, year: Year, factor: f64) {
        if let Some(datum) = self
            .series
            .get_mut(indicator)
            .and_then(|s| s.get_mut(&year))
        {
            *datum = datum.scaled(factor);
        }
    }

    /// Replaces a single (indicator, year) cell, returning the previous value.
    pub fn replace(
        &mut self,
        indicator: &IndicatorName,
        year: Year,
        datum: Datum,
    ) -> Result<Datum, DataError> {
        let slot = self
            .series
            .get_mut(indicator)
            .and_then(|s| s.get_mut(&year))
            .ok_or_else(|| DataError::NotFound(format!("{indicator}/{year}")))?;
        Ok(std::mem::replace(slot, datum))
    }
}

/// Model output keyed by (scenario, country, funding fraction, indicator, year).
///
/// The zero-funding row is required for every (scenario, country) pair that
/// enters an analysis; `validate` enforces it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelResults {
    rows: BTreeMap<ScenarioDescriptor, BTreeMap<Iso3, BTreeMap<FundingFraction, IndicatorFrame>>>,
    indicators: BTreeSet<IndicatorName>,
}

impl ModelResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        scenario: ScenarioDescriptor,
        country: Iso3,
        funding_fraction: FundingFraction,
        indicator: IndicatorName,
        year: Year,
        datum: Datum,
    ) -> Result<(), DataError> {
        self.indicators.insert(indicator.clone());
        self.rows
            .entry(scenario)
            .or_default()
            .entry(country)
            .or_default()
            .entry(funding_fraction)
            .or_default()
            .insert(indicator, year, datum)
    }

    /// Merges another store; every key of `other` must be absent here.
    pub fn merge(&mut self, other: ModelResults) -> Result<(), DataError> {
        for (scenario, by_country) in other.rows {
            for (country, by_fraction) in by_country {
                for (fraction, frame) in by_fraction {
                    for (indicator, series) in frame.series {
                        for (year, datum) in series {
                            self.insert(
                                scenario.clone(),
                                country.clone(),
                                fraction,
                                indicator.clone(),
                                year,
                                datum,
                            )?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// All operating points stored for one (scenario, country).
    pub fn country_block(
        &self,
        scenario: &ScenarioDescriptor,
        country: &Iso3,
    ) -> Result<&BTreeMap<FundingFraction, IndicatorFrame>, DataError> {
        self.rows
            .get(scenario)
            .and_then(|by_country| by_country.get(country))
            .filter(|block| !block.is_empty())
            .ok_or_else(|| DataError::NotFound(format!("model results for {scenario}/{country}")))
    }

    pub fn frame(
        &self,
        scenario: &ScenarioDescriptor,
        country: &Iso3,
        funding_fraction: FundingFraction,
    ) -> Result<&IndicatorFrame, DataError> {
        self.country_block(scenario, country)?
            .get(&funding_fraction)
            .ok_or_else(|| {
                DataError::NotFound(format!(
                    "model results for {scenario}/{country} at {funding_fraction}"
                ))
            })
    }

    pub fn series(
        &self,
        scenario: &ScenarioDescriptor,
        country: &Iso3,
        funding_fraction: FundingFraction,
        indicator: &IndicatorName,
    ) -> Result<&YearSeries, DataError> {
        self.frame(scenario, country, funding_fraction)?
            .series(indicator)
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &ScenarioDescriptor> {
        self.rows.keys()
    }

    pub fn countries(&self) -> BTreeSet<Iso3> {
        self.rows
            .values()
            .flat_map(|by_country| by_country.keys().cloned())
            .collect()
    }

    /// Union of funding fractions stored across all scenarios and countries.
    pub fn funding_fractions(&self) -> BTreeSet<FundingFraction> {
        self.rows
            .values()
            .flat_map(|by_country| by_country.values())
            .flat_map(|block| block.keys().copied())
            .collect()
    }

    pub fn indicators(&self) -> &BTreeSet<IndicatorName> {
        &self.indicators
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Checks the zero-funding row is present for every country of one
    /// scenario. Counterfactual scenarios are often stored at full funding
    /// only, so this is applied per analysis scenario rather than globally.
    pub fn validate_scenario(&self, scenario: &ScenarioDescriptor) -> Result<(), ValidationError> {
        if let Some(by_country) = self.rows.get(scenario) {
            for (country, block) in by_country {
                if !block.contains_key(&FundingFraction::ZERO) {
                    return Err(ValidationError::MissingZeroFundingRow {
                        scenario: scenario.clone(),
                        country: country.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks the zero-funding row for every stored scenario.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for scenario in self.rows.keys() {
            self.validate_scenario(scenario)?;
        }
        Ok(())
    }
}

/// Single-statistic reference data keyed by (scenario, country, indicator, year).
///
/// Shape shared by partner-reported historical series and programmatic-funding
/// inputs; values are central estimates only.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnnualData {
    rows: BTreeMap<ScenarioDescriptor, BTreeMap<Iso3, BTreeMap<IndicatorName, BTreeMap<Year, f64>>>>,
}

/// Externally reported historical series used as the calibration anchor.
pub type PartnerData = AnnualData;

/// Programmatic-funding input series.
pub type PFInputData = AnnualData;

impl AnnualData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        scenario: ScenarioDescriptor,
        country: Iso3,
        indicator: IndicatorName,
        year: Year,
        value: f64,
    ) -> Result<(), DataError> {
        let slot = self
            .rows
            .entry(scenario.clone())
            .or_default()
            .entry(country.clone())
            .or_default()
            .entry(indicator.clone())
            .or_default();
        if slot.contains_key(&year) {
            return Err(DataError::Duplicate(format!(
                "{scenario}/{country}/{indicator}/{year}"
            )));
        }
        slot.insert(year, value);
        Ok(())
    }

    pub fn series(
        &self,
        scenario: &ScenarioDescriptor,
        country: &Iso3,
        indicator: &IndicatorName,
    ) -> Result<&BTreeMap<Year, f64>, DataError> {
        self.rows
            .get(scenario)
            .and_then(|by_country| by_country.get(country))
            .and_then(|by_indicator| by_indicator.get(indicator))
            .filter(|series| !series.is_empty())
            .ok_or_else(|| DataError::NotFound(format!("{scenario}/{country}/{indicator}")))
    }

    pub fn value(
        &self,
        scenario: &ScenarioDescriptor,
        country: &Iso3,
        indicator: &IndicatorName,
        year: Year,
    ) -> Result<f64, DataError> {
        self.series(scenario, country, indicator)?
            .get(&year)
            .copied()
            .ok_or_else(|| {
                DataError::NotFound(format!("{scenario}/{country}/{indicator}/{year}"))
            })
    }

    /// The last reported (year, value), the base-year anchor for calibration.
    pub fn latest(
        &self,
        scenario: &ScenarioDescriptor,
        country: &Iso3,
        indicator: &IndicatorName,
    ) -> Result<(Year, f64), DataError> {
        let series = self.series(scenario, country, indicator)?;
        let (year, value) = series
            .iter()
            .next_back()
            .ok_or_else(|| DataError::NotFound(format!("{scenario}/{country}/{indicator}")))?;
        Ok((*year, *value))
    }

    pub fn countries(&self) -> BTreeSet<Iso3> {
        self.rows
            .values()
            .flat_map(|by_country| by_country.keys().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
