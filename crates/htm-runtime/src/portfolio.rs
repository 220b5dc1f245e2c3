//! Aggregation of calibrated country trajectories to the portfolio level.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use htm_core::{
    Database, Datum, Diagnostic, IndicatorName, Iso3, Parameters, ScenarioDescriptor, Year,
};
use htm_solver::SolverReport;

use crate::projection::CountryProjection;

/// Portfolio-level trajectories: indicator -> year -> summed datum.
pub type PortfolioTrajectories = BTreeMap<IndicatorName, BTreeMap<Year, Datum>>;

/// The full result of one analysis run: per-country results, the aggregated
/// portfolio and whatever the run had to warn about on the way.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioProjection {
    pub scenario_descriptor: ScenarioDescriptor,
    pub country_projections: BTreeMap<Iso3, CountryProjection>,
    pub portfolio: PortfolioTrajectories,
    pub tgf_funding_by_country: BTreeMap<Iso3, f64>,
    pub non_tgf_funding_by_country: BTreeMap<Iso3, f64>,
    pub solver: Option<SolverReport>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PortfolioProjection {
    /// Central portfolio series for one indicator.
    pub fn central_series(&self, indicator: &IndicatorName) -> BTreeMap<Year, f64> {
        self.portfolio
            .get(indicator)
            .map(|series| series.iter().map(|(y, d)| (*y, d.central)).collect())
            .unwrap_or_default()
    }
}

/// Sums adjusted country trajectories over the declared portfolio, imputing
/// unmodelled members from partner rates where the indicator policy permits.
///
/// Bounds add element-wise: low with low, central with central, high with
/// high. Aggregation is linear over disjoint country sets.
pub(crate) fn aggregate(
    projections: &BTreeMap<Iso3, CountryProjection>,
    database: &Database,
    scenario: &ScenarioDescriptor,
    parameters: &Parameters,
) -> (PortfolioTrajectories, Vec<Diagnostic>) {
    let mut portfolio: PortfolioTrajectories = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for projection in projections.values() {
        for (indicator, series) in projection.model_projection_adj.iter() {
            let slot = portfolio.entry(indicator.clone()).or_default();
            for (year, datum) in series {
                *slot.entry(*year).or_insert(Datum::ZERO) += *datum;
            }
        }
    }

    for country in parameters.unmodelled_countries() {
        if projections.contains_key(country) {
            continue;
        }
        impute_country(
            &mut portfolio,
            &mut diagnostics,
            database,
            scenario,
            parameters,
            country,
        );
    }

    debug!(
        indicators = portfolio.len(),
        warnings = diagnostics.len(),
        "portfolio aggregated"
    );
    (portfolio, diagnostics)
}

/// Adds an unmodelled country's contribution: partner rate times population
/// for every indicator flagged for scaling. Indicators without the flag
/// contribute nothing for missing countries.
fn impute_country(
    portfolio: &mut PortfolioTrajectories,
    diagnostics: &mut Vec<Diagnostic>,
    database: &Database,
    scenario: &ScenarioDescriptor,
    parameters: &Parameters,
    country: &Iso3,
) {
    let population = IndicatorName::population();
    let partner = &database.partner_data;

    let Ok((base_year, base_population)) = partner.latest(scenario, country, &population) else {
        diagnostics.push(Diagnostic::CountryExcluded {
            country: country.clone(),
            reason: "no partner population for imputation".to_string(),
        });
        return;
    };
    if base_population <= 0.0 {
        diagnostics.push(Diagnostic::CountryExcluded {
            country: country.clone(),
            reason: "partner population is zero".to_string(),
        });
        return;
    }

    for def in &parameters.indicators {
        if !def.use_scaling || def.name == population {
            continue;
        }
        let Some(series) = portfolio.get(&def.name).map(|s| s.keys().copied().collect::<Vec<_>>())
        else {
            continue;
        };
        let Ok((_, base_value)) = partner.latest(scenario, country, &def.name) else {
            diagnostics.push(Diagnostic::CalibrationMissing {
                country: country.clone(),
                indicator: def.name.clone(),
            });
            continue;
        };
        let rate = base_value / base_population;

        let slot = portfolio.entry(def.name.clone()).or_default();
        for year in series {
            let population_in_year = partner
                .value(scenario, country, &population, year)
                .unwrap_or(base_population);
            let imputed = rate * population_in_year;
            *slot.entry(year).or_insert(Datum::ZERO) += Datum::single(imputed);
        }
        debug!(%country, indicator = %def.name, base_year, rate, "imputed unmodelled country");
    }
}
