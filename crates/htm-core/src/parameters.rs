//! Run configuration as a closed record.
//!
//! Every recognised option is a named field; unknown keys in a parameter
//! file are rejected at load time rather than silently carried along.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{IndicatorName, Iso3, ScenarioDescriptor, ValidationError, Year, YearRange};

/// An indicator declaration: its name and whether country values are scaled
/// when aggregating to a portfolio that includes unmodelled countries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorDef {
    pub name: IndicatorName,
    pub use_scaling: bool,
}

/// Scenario descriptors for the three reference counterfactuals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterfactualScenarios {
    pub null: ScenarioDescriptor,
    pub constant_coverage: ScenarioDescriptor,
    pub global_plan: ScenarioDescriptor,
}

/// The counterfactual family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterfactualKind {
    /// No intervention at all.
    Null,
    /// Coverage frozen at the baseline year.
    ConstantCoverage,
    /// Stated global-plan targets.
    GlobalPlan,
}

/// One entry of the forward-looking innovation schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InnovationFactor {
    pub year: Year,
    pub indicator: IndicatorName,
    pub factor: f64,
}

/// Named configuration for one analysis run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Parameters {
    pub start_year: Year,
    pub end_year: Year,
    pub years_for_funding: YearRange,
    pub years_for_obj_func: YearRange,
    pub innovation_on: bool,
    pub handle_out_of_bounds_costs: bool,
    pub load_data_from_raw_files: bool,
    pub counterfactuals: CounterfactualScenarios,
    pub indicators: Vec<IndicatorDef>,
    pub modelled_countries: BTreeSet<Iso3>,
    pub portfolio_countries: BTreeSet<Iso3>,
    #[serde(default)]
    pub innovation_factors: Vec<InnovationFactor>,
}

impl Parameters {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let horizon = YearRange::new(self.start_year, self.end_year)?;
        for range in [self.years_for_funding, self.years_for_obj_func] {
            if range.first < horizon.first || range.last > horizon.last {
                return Err(ValidationError::RangeOutsideHorizon { range, horizon });
            }
        }
        for country in &self.modelled_countries {
            if !self.portfolio_countries.contains(country) {
                return Err(ValidationError::PortfolioMissingModelled(country.clone()));
            }
        }
        for f in &self.innovation_factors {
            if !f.factor.is_finite() || f.factor <= 0.0 {
                return Err(ValidationError::BadInnovationFactor {
                    indicator: f.indicator.clone(),
                    year: f.year,
                    factor: f.factor,
                });
            }
        }
        Ok(())
    }

    pub fn horizon(&self) -> YearRange {
        YearRange {
            first: self.start_year,
            last: self.end_year,
        }
    }

    pub fn use_scaling(&self, indicator: &IndicatorName) -> bool {
        self.indicators
            .iter()
            .any(|def| &def.name == indicator && def.use_scaling)
    }

    pub fn indicator_names(&self) -> impl Iterator<Item = &IndicatorName> {
        self.indicators.iter().map(|def| &def.name)
    }

    pub fn innovation_factor(&self, year: Year, indicator: &IndicatorName) -> Option<f64> {
        self.innovation_factors
            .iter()
            .find(|f| f.year == year && &f.indicator == indicator)
            .map(|f| f.factor)
    }

    pub fn counterfactual(&self, kind: CounterfactualKind) -> &ScenarioDescriptor {
        match kind {
            CounterfactualKind::Null => &self.counterfactuals.null,
            CounterfactualKind::ConstantCoverage => &self.counterfactuals.constant_coverage,
            CounterfactualKind::GlobalPlan => &self.counterfactuals.global_plan,
        }
    }

    /// Portfolio countries that have no modelled results.
    pub fn unmodelled_countries(&self) -> impl Iterator<Item = &Iso3> {
        self.portfolio_countries
            .iter()
            .filter(|c| !self.modelled_countries.contains(*c))
    }
}
