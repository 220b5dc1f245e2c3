#![deny(warnings)]

//! Core domain models and invariants for the allocation engine.
//!
//! This crate defines the typed, keyed tables over
//! (scenario, funding fraction, country, year, indicator) that the rest of
//! the workspace consumes, together with the identifier newtypes, the
//! low/central/high `Datum`, funding tables, run parameters and the shared
//! error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod database;
mod funding;
mod parameters;
mod store;

pub use database::{CombinedRow, Database, Gp};
pub use funding::{FundingTable, NonTgfFunding, TgfFunding};
pub use parameters::{
    CounterfactualKind, CounterfactualScenarios, IndicatorDef, InnovationFactor, Parameters,
};
pub use store::{AnnualData, IndicatorFrame, ModelResults, PFInputData, PartnerData, YearSeries};

/// Calendar year.
pub type Year = i32;

/// Inclusive range of calendar years, e.g. the funding window 2027..=2029.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub first: Year,
    pub last: Year,
}

impl YearRange {
    pub fn new(first: Year, last: Year) -> Result<Self, ValidationError> {
        if first > last {
            return Err(ValidationError::EmptyYearRange { first, last });
        }
        Ok(Self { first, last })
    }

    pub fn contains(&self, year: Year) -> bool {
        (self.first..=self.last).contains(&year)
    }

    pub fn iter(&self) -> impl Iterator<Item = Year> {
        self.first..=self.last
    }

    /// Number of years covered; never zero by construction.
    pub fn len(&self) -> usize {
        (self.last - self.first + 1) as usize
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.first, self.last)
    }
}

/// Three-letter uppercase ISO3 country code, e.g. "UGA".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Iso3(String);

impl<'de> Deserialize<'de> for Iso3 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        Iso3::new(code).map_err(serde::de::Error::custom)
    }
}

impl Iso3 {
    pub fn new(code: impl Into<String>) -> Result<Self, ValidationError> {
        let code = code.into();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::BadCountryCode(code));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Iso3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named measurable quantity, e.g. `cases`, `deaths`, `cost`, `population`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndicatorName(String);

impl IndicatorName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn cases() -> Self {
        Self::new("cases")
    }

    pub fn deaths() -> Self {
        Self::new("deaths")
    }

    pub fn cost() -> Self {
        Self::new("cost")
    }

    pub fn population() -> Self {
        Self::new("population")
    }

    /// Population at risk, used by the malaria counterfactual baselines.
    pub fn par() -> Self {
        Self::new("par")
    }
}

impl fmt::Display for IndicatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque label identifying a modelling regime, e.g. "IC_IC" or "NULL_NULL".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScenarioDescriptor(String);

impl ScenarioDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScenarioDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Country-level funding as a fraction of the full-programme cost.
///
/// Always finite and within `[0, 1]`, which lets it implement a total order
/// and key the ordered stores exactly, with no grid quantisation.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct FundingFraction(f64);

impl<'de> Deserialize<'de> for FundingFraction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        FundingFraction::new(value).map_err(serde::de::Error::custom)
    }
}

impl FundingFraction {
    pub const ZERO: FundingFraction = FundingFraction(0.0);
    pub const ONE: FundingFraction = FundingFraction(1.0);

    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(ValidationError::InvalidFraction(value));
        }
        Ok(Self(value))
    }

    /// Clamps an arbitrary finite value into `[0, 1]`.
    pub fn clamped(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::InvalidFraction(value));
        }
        Ok(Self(value.clamp(0.0, 1.0)))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for FundingFraction {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}

impl Eq for FundingFraction {}

impl PartialOrd for FundingFraction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FundingFraction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for FundingFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Central estimate with scenario uncertainty bounds.
///
/// The bounds are additive under portfolio aggregation: they describe
/// scenario envelopes, not statistical variance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    pub low: f64,
    pub central: f64,
    pub high: f64,
}

impl Datum {
    pub fn new(low: f64, central: f64, high: f64) -> Result<Self, ValidationError> {
        if !(low.is_finite() && central.is_finite() && high.is_finite()) {
            return Err(ValidationError::NonFinite);
        }
        if !(low <= central && central <= high) {
            return Err(ValidationError::DatumOutOfOrder { low, central, high });
        }
        Ok(Self { low, central, high })
    }

    /// A datum with all three statistics equal, for single-point sources.
    pub fn single(value: f64) -> Self {
        Self {
            low: value,
            central: value,
            high: value,
        }
    }

    pub const ZERO: Datum = Datum {
        low: 0.0,
        central: 0.0,
        high: 0.0,
    };

    /// Multiplies every statistic by a non-negative factor.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            low: self.low * factor,
            central: self.central * factor,
            high: self.high * factor,
        }
    }
}

impl std::ops::Add for Datum {
    type Output = Datum;

    fn add(self, rhs: Datum) -> Datum {
        Datum {
            low: self.low + rhs.low,
            central: self.central + rhs.central,
            high: self.high + rhs.high,
        }
    }
}

impl std::ops::AddAssign for Datum {
    fn add_assign(&mut self, rhs: Datum) {
        self.low += rhs.low;
        self.central += rhs.central;
        self.high += rhs.high;
    }
}

/// Violations of construction invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("funding fraction {0} is not a finite value in [0, 1]")]
    InvalidFraction(f64),
    #[error("country code {0:?} is not a three-letter uppercase ISO3 code")]
    BadCountryCode(String),
    #[error("datum bounds out of order: low {low}, central {central}, high {high}")]
    DatumOutOfOrder { low: f64, central: f64, high: f64 },
    #[error("non-finite numeric value encountered")]
    NonFinite,
    #[error("negative monetary value is invalid")]
    NegativeMoney,
    #[error("year range is empty: first {first}, last {last}")]
    EmptyYearRange { first: Year, last: Year },
    #[error("year range {range} extends outside the analysis horizon {horizon}")]
    RangeOutsideHorizon { range: YearRange, horizon: YearRange },
    #[error("portfolio country list does not contain modelled country {0}")]
    PortfolioMissingModelled(Iso3),
    #[error("innovation factor for {indicator} in {year} must be finite and positive, got {factor}")]
    BadInnovationFactor {
        indicator: IndicatorName,
        year: Year,
        factor: f64,
    },
    #[error("country {0} listed more than once in funding table")]
    DuplicateFundingRow(Iso3),
    #[error("no zero-funding row for {scenario}/{country}")]
    MissingZeroFundingRow {
        scenario: ScenarioDescriptor,
        country: Iso3,
    },
}

/// Failures of keyed lookups and insertions on the tabular stores.
#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("no rows found for {0}")]
    NotFound(String),
    #[error("duplicate key on insert: {0}")]
    Duplicate(String),
}

/// Non-fatal conditions accumulated onto results rather than aborting a run.
///
/// Per-country fatal errors degrade that country into one of these; only
/// cross-cutting failures abort a portfolio run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// Partner anchor absent or zero; calibration ratio fell through to 1.
    CalibrationMissing {
        country: Iso3,
        indicator: IndicatorName,
    },
    /// Sum of per-country floors exceeds the donor budget.
    BudgetInfeasible { shortfall: f64 },
    /// Solver step budget exhausted; result is the best allocation so far.
    Timeout { steps: usize },
    /// Country dropped from the portfolio run.
    CountryExcluded { country: Iso3, reason: String },
    /// Resolved cost trajectory clamped back into the stored envelope.
    CostClamped { country: Iso3, amount: f64 },
    /// Requested funding fraction clamped to the stored range.
    FractionClamped {
        country: Iso3,
        requested: f64,
        used: f64,
    },
    /// Co-financing already covers the full programme; excess not allocated.
    FullyFundedByNonTgf { country: Iso3, excess: f64 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::CalibrationMissing { country, indicator } => {
                write!(f, "no partner anchor for {country}/{indicator}; ratio = 1")
            }
            Diagnostic::BudgetInfeasible { shortfall } => {
                write!(f, "floors exceed donor budget by {shortfall:.0}")
            }
            Diagnostic::Timeout { steps } => write!(f, "step budget exhausted after {steps} steps"),
            Diagnostic::CountryExcluded { country, reason } => {
                write!(f, "{country} excluded: {reason}")
            }
            Diagnostic::CostClamped { country, amount } => {
                write!(f, "cost for {country} clamped by {amount:.0}")
            }
            Diagnostic::FractionClamped {
                country,
                requested,
                used,
            } => write!(f, "fraction for {country} clamped from {requested} to {used}"),
            Diagnostic::FullyFundedByNonTgf { country, excess } => {
                write!(f, "{country} fully funded from co-financing ({excess:.0} unallocated)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn iso3_accepts_uppercase_and_rejects_everything_else() {
        assert!(Iso3::new("UGA").is_ok());
        assert_eq!(
            Iso3::new("uga"),
            Err(ValidationError::BadCountryCode("uga".to_string()))
        );
        assert!(Iso3::new("UGAN").is_err());
        assert!(Iso3::new("UG").is_err());
    }

    #[test]
    fn funding_fraction_rejects_out_of_range() {
        assert!(FundingFraction::new(0.0).is_ok());
        assert!(FundingFraction::new(1.0).is_ok());
        assert!(FundingFraction::new(-0.1).is_err());
        assert!(FundingFraction::new(1.1).is_err());
        assert!(FundingFraction::new(f64::NAN).is_err());
    }

    #[test]
    fn funding_fraction_orders_totally() {
        let mut v = vec![
            FundingFraction::new(0.9).unwrap(),
            FundingFraction::ZERO,
            FundingFraction::new(0.5).unwrap(),
        ];
        v.sort();
        assert_eq!(v[0], FundingFraction::ZERO);
        assert_eq!(v[2].value(), 0.9);
    }

    #[test]
    fn datum_enforces_bound_order() {
        assert!(Datum::new(1.0, 2.0, 3.0).is_ok());
        assert!(Datum::new(3.0, 2.0, 1.0).is_err());
        assert!(Datum::new(1.0, f64::INFINITY, 3.0).is_err());
    }

    #[test]
    fn year_range_iterates_inclusively() {
        let r = YearRange::new(2027, 2029).unwrap();
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![2027, 2028, 2029]);
        assert_eq!(r.len(), 3);
        assert!(YearRange::new(2030, 2029).is_err());
    }

    proptest! {
        #[test]
        fn datum_addition_preserves_order(a in 0.0f64..1e6, b in 0.0f64..1e6, c in 0.0f64..1e6,
                                          d in 0.0f64..1e6, e in 0.0f64..1e6, f in 0.0f64..1e6) {
            let mut lows = [a, b, c];
            let mut highs = [d, e, f];
            lows.sort_by(f64::total_cmp);
            highs.sort_by(f64::total_cmp);
            let x = Datum::new(lows[0], lows[1], lows[2]).unwrap();
            let y = Datum::new(highs[0], highs[1], highs[2]).unwrap();
            let sum = x + y;
            prop_assert!(sum.low <= sum.central && sum.central <= sum.high);
        }

        #[test]
        fn scaling_by_nonnegative_preserves_order(v in 0.0f64..1e6, f in 0.0f64..10.0) {
            let d = Datum::new(v * 0.5, v, v * 2.0).unwrap();
            let s = d.scaled(f);
            prop_assert!(s.low <= s.central && s.central <= s.high);
        }
    }
}
