//! Donor and co-financing budget tables.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{DataError, Iso3, ValidationError, YearRange};

/// Dollar amounts per country over a declared funding window.
///
/// Each country appears at most once and amounts are non-negative. The two
/// roles of this table are aliased below: the donor pool the solver
/// distributes, and the fixed co-financing that sets each country's floor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FundingTable {
    window: YearRange,
    amounts: BTreeMap<Iso3, Decimal>,
}

/// Donor budget pool allocated across countries by the solver.
pub type TgfFunding = FundingTable;

/// Co-financing fixed per country; the solver floor.
pub type NonTgfFunding = FundingTable;

impl FundingTable {
    pub fn new(window: YearRange) -> Self {
        Self {
            window,
            amounts: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, country: Iso3, amount: Decimal) -> Result<(), ValidationError> {
        if amount < Decimal::ZERO {
            return Err(ValidationError::NegativeMoney);
        }
        if self.amounts.contains_key(&country) {
            return Err(ValidationError::DuplicateFundingRow(country));
        }
        self.amounts.insert(country, amount);
        Ok(())
    }

    pub fn window(&self) -> YearRange {
        self.window
    }

    pub fn amount(&self, country: &Iso3) -> Result<Decimal, DataError> {
        self.amounts
            .get(country)
            .copied()
            .ok_or_else(|| DataError::NotFound(format!("funding for {country}")))
    }

    /// Dollar amount as f64 for the solver; absent countries are zero.
    pub fn amount_or_zero(&self, country: &Iso3) -> f64 {
        self.amounts
            .get(country)
            .and_then(|d| d.to_f64())
            .unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.amounts
            .values()
            .filter_map(|d| d.to_f64())
            .sum()
    }

    pub fn countries(&self) -> impl Iterator<Item = &Iso3> {
        self.amounts.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> YearRange {
        YearRange::new(2027, 2029).unwrap()
    }

    #[test]
    fn rejects_negative_amounts() {
        let mut t = FundingTable::new(window());
        assert_eq!(
            t.insert(Iso3::new("UGA").unwrap(), Decimal::new(-1, 0)),
            Err(ValidationError::NegativeMoney)
        );
    }

    #[test]
    fn rejects_repeated_country() {
        let mut t = FundingTable::new(window());
        t.insert(Iso3::new("UGA").unwrap(), Decimal::new(100, 0))
            .unwrap();
        assert!(t
            .insert(Iso3::new("UGA").unwrap(), Decimal::new(50, 0))
            .is_err());
    }

    #[test]
    fn totals_and_defaults() {
        let mut t = FundingTable::new(window());
        t.insert(Iso3::new("UGA").unwrap(), Decimal::new(100, 0))
            .unwrap();
        t.insert(Iso3::new("KEN").unwrap(), Decimal::new(250, 0))
            .unwrap();
        assert_eq!(t.total(), 350.0);
        assert_eq!(t.amount_or_zero(&Iso3::new("TZA").unwrap()), 0.0);
        assert!(t.amount(&Iso3::new("TZA").unwrap()).is_err());
    }
}
