//! Reference-scenario evaluation and derived averted-burden measures.

use std::collections::BTreeMap;

use htm_core::{Datum, IndicatorName, PartnerData, ScenarioDescriptor, Year};

use crate::portfolio::PortfolioProjection;

/// Element-wise per-year difference `counterfactual - actual` for one
/// indicator: deaths averted against the null scenario, infections averted
/// against constant coverage, and so on. Years absent from either side are
/// skipped.
pub fn averted(
    counterfactual: &PortfolioProjection,
    actual: &PortfolioProjection,
    indicator: &IndicatorName,
) -> BTreeMap<Year, Datum> {
    let Some(cf) = counterfactual.portfolio.get(indicator) else {
        return BTreeMap::new();
    };
    let Some(ic) = actual.portfolio.get(indicator) else {
        return BTreeMap::new();
    };
    cf.iter()
        .filter_map(|(year, cf_datum)| {
            ic.get(year).map(|ic_datum| {
                (
                    *year,
                    // Bounds difference pairs like with like; the result is
                    // a signed envelope, not a re-ordered datum.
                    Datum {
                        low: cf_datum.low - ic_datum.low,
                        central: cf_datum.central - ic_datum.central,
                        high: cf_datum.high - ic_datum.high,
                    },
                )
            })
        })
        .collect()
}

/// Per-disease strategy hooks for the counterfactual family.
///
/// The default implementation answers `None` for the baseline overrides,
/// meaning the engine differences two modelled scenarios. Diseases whose
/// null is not modelled (malaria) instead supply a fixed historical rate to
/// difference against.
pub trait DiseaseAdjustments: Send + Sync {
    fn disease(&self) -> &str;

    /// Lives saved per year against a fixed historical mortality baseline.
    fn lives_saved_against_baseline(
        &self,
        _actual: &PortfolioProjection,
        _partner: &PartnerData,
        _scenario: &ScenarioDescriptor,
    ) -> Option<BTreeMap<Year, f64>> {
        None
    }

    /// Infections averted per year against a fixed historical incidence
    /// baseline.
    fn infections_averted_against_baseline(
        &self,
        _actual: &PortfolioProjection,
        _partner: &PartnerData,
        _scenario: &ScenarioDescriptor,
    ) -> Option<BTreeMap<Year, f64>> {
        None
    }
}

/// No overrides; the modelled counterfactual scenarios are authoritative.
#[derive(Clone, Debug)]
pub struct DefaultAdjustments {
    pub disease: String,
}

impl DefaultAdjustments {
    pub fn new(disease: impl Into<String>) -> Self {
        Self {
            disease: disease.into(),
        }
    }
}

impl DiseaseAdjustments for DefaultAdjustments {
    fn disease(&self) -> &str {
        &self.disease
    }
}

/// Malaria baselines: fixed historical mortality and incidence rates per
/// 1000 population at risk, differenced against the projected portfolio.
#[derive(Clone, Debug)]
pub struct MalariaAdjustments {
    pub mortality_per_1000_par: f64,
    pub incidence_per_1000_par: f64,
}

impl MalariaAdjustments {
    fn baseline_minus_projection(
        &self,
        actual: &PortfolioProjection,
        rate_per_1000: f64,
        projected: &IndicatorName,
    ) -> Option<BTreeMap<Year, f64>> {
        let par = actual.portfolio.get(&IndicatorName::par())?;
        let series = actual.portfolio.get(projected)?;
        Some(
            series
                .iter()
                .filter_map(|(year, datum)| {
                    par.get(year).map(|par_datum| {
                        let baseline = rate_per_1000 / 1000.0 * par_datum.central;
                        (*year, baseline - datum.central)
                    })
                })
                .collect(),
        )
    }
}

impl DiseaseAdjustments for MalariaAdjustments {
    fn disease(&self) -> &str {
        "malaria"
    }

    fn lives_saved_against_baseline(
        &self,
        actual: &PortfolioProjection,
        _partner: &PartnerData,
        _scenario: &ScenarioDescriptor,
    ) -> Option<BTreeMap<Year, f64>> {
        self.baseline_minus_projection(actual, self.mortality_per_1000_par, &IndicatorName::deaths())
    }

    fn infections_averted_against_baseline(
        &self,
        actual: &PortfolioProjection,
        _partner: &PartnerData,
        _scenario: &ScenarioDescriptor,
    ) -> Option<BTreeMap<Year, f64>> {
        self.baseline_minus_projection(actual, self.incidence_per_1000_par, &IndicatorName::cases())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection_with(series: &[(&str, &[(Year, f64)])]) -> PortfolioProjection {
        let mut portfolio = BTreeMap::new();
        for (indicator, values) in series {
            let mut by_year = BTreeMap::new();
            for (year, value) in *values {
                by_year.insert(*year, Datum::single(*value));
            }
            portfolio.insert(IndicatorName::new(*indicator), by_year);
        }
        PortfolioProjection {
            scenario_descriptor: ScenarioDescriptor::new("X"),
            country_projections: BTreeMap::new(),
            portfolio,
            tgf_funding_by_country: BTreeMap::new(),
            non_tgf_funding_by_country: BTreeMap::new(),
            solver: None,
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn averted_differences_element_wise() {
        let ic = projection_with(&[("deaths", &[(2027, 500.0), (2028, 400.0)])]);
        let cf = projection_with(&[("deaths", &[(2027, 1200.0), (2028, 900.0)])]);
        let saved = averted(&cf, &ic, &IndicatorName::deaths());
        assert_eq!(saved[&2027].central, 700.0);
        assert_eq!(saved[&2028].central, 500.0);
    }

    #[test]
    fn averted_skips_unshared_years() {
        let ic = projection_with(&[("deaths", &[(2027, 500.0)])]);
        let cf = projection_with(&[("deaths", &[(2027, 1200.0), (2028, 900.0)])]);
        let saved = averted(&cf, &ic, &IndicatorName::deaths());
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn malaria_baseline_differences_against_historical_rate() {
        let ic = projection_with(&[
            ("deaths", &[(2027, 40.0)]),
            ("par", &[(2027, 100_000.0)]),
        ]);
        let adjustments = MalariaAdjustments {
            mortality_per_1000_par: 0.6,
            incidence_per_1000_par: 220.0,
        };
        let partner = PartnerData::new();
        let saved = adjustments
            .lives_saved_against_baseline(&ic, &partner, &ScenarioDescriptor::new("IC_IC"))
            .unwrap();
        // baseline 0.6/1000 * 100000 = 60 deaths; 20 saved
        assert_eq!(saved[&2027], 20.0);
    }

    #[test]
    fn default_adjustments_have_no_overrides() {
        let ic = projection_with(&[("deaths", &[(2027, 40.0)])]);
        let adjustments = DefaultAdjustments::new("tb");
        assert_eq!(adjustments.disease(), "tb");
        assert!(adjustments
            .lives_saved_against_baseline(&ic, &PartnerData::new(), &ScenarioDescriptor::new("X"))
            .is_none());
    }
}
