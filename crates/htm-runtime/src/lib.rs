#![deny(warnings)]

//! Analysis orchestration: country projection, portfolio aggregation,
//! counterfactual evaluation and report assembly on top of the emulator
//! and allocation solver.
//!
//! The core pipeline is pure compute. Per-country failures degrade that
//! country into a diagnostic on the result; only cross-cutting failures
//! (bad parameters, empty inputs) abort a run.

use thiserror::Error;

mod analysis;
mod counterfactual;
mod objective;
mod portfolio;
mod projection;
mod report;

pub use analysis::{Analysis, SetOfPortfolioProjections};
pub use counterfactual::{averted, DefaultAdjustments, DiseaseAdjustments, MalariaAdjustments};
pub use objective::{combine, CasesAndDeaths, Objective, TotalDeaths};
pub use portfolio::{PortfolioProjection, PortfolioTrajectories};
pub use projection::CountryProjection;
pub use report::{Report, ReportValue};

use htm_core::{
    Database, DataError, NonTgfFunding, Parameters, ScenarioDescriptor, TgfFunding,
    ValidationError,
};
use htm_curves::EmulatorError;
use htm_solver::{SolverError, SolverOptions};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Emulator(#[from] EmulatorError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("no model results to analyse")]
    NoInputs,
    #[error("no countries could be projected")]
    EmptyPortfolio,
}

/// The typed tables one analysis consumes, as supplied by upstream parsers.
pub struct AnalysisInputs {
    pub database: Database,
    pub tgf_funding: TgfFunding,
    pub non_tgf_funding: NonTgfFunding,
}

/// Library entry point: optimises the donor allocation for one scenario and
/// returns the resulting portfolio projection.
pub fn run_analysis(
    parameters: Parameters,
    inputs: AnalysisInputs,
    scenario_descriptor: ScenarioDescriptor,
) -> Result<PortfolioProjection, AnalysisError> {
    Analysis::new(
        inputs.database,
        inputs.tgf_funding,
        inputs.non_tgf_funding,
        parameters,
        scenario_descriptor,
    )?
    .portfolio_projection_approach_b(&SolverOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use htm_core::{
        AnnualData, CounterfactualKind, CounterfactualScenarios, Datum, Diagnostic,
        FundingFraction, Gp, IndicatorDef, IndicatorName, Iso3, ModelResults, YearRange,
    };
    use rust_decimal::Decimal;

    fn iso(code: &str) -> Iso3 {
        Iso3::new(code).unwrap()
    }

    fn ic_scenario() -> ScenarioDescriptor {
        ScenarioDescriptor::new("IC_IC")
    }

    fn parameters(countries: &[&str]) -> Parameters {
        Parameters {
            start_year: 2024,
            end_year: 2030,
            years_for_funding: YearRange::new(2027, 2029).unwrap(),
            years_for_obj_func: YearRange::new(2030, 2030).unwrap(),
            innovation_on: false,
            handle_out_of_bounds_costs: false,
            load_data_from_raw_files: true,
            counterfactuals: CounterfactualScenarios {
                null: ScenarioDescriptor::new("NULL_NULL"),
                constant_coverage: ScenarioDescriptor::new("CC_CC"),
                global_plan: ScenarioDescriptor::new("GP_GP"),
            },
            indicators: vec![
                IndicatorDef {
                    name: IndicatorName::cases(),
                    use_scaling: false,
                },
                IndicatorDef {
                    name: IndicatorName::deaths(),
                    use_scaling: false,
                },
                IndicatorDef {
                    name: IndicatorName::cost(),
                    use_scaling: false,
                },
            ],
            modelled_countries: countries.iter().map(|c| iso(c)).collect(),
            portfolio_countries: countries.iter().map(|c| iso(c)).collect(),
            innovation_factors: vec![],
        }
    }

    /// Inserts one operating point: cost spread over the funding window,
    /// cases and deaths landing in the single objective year.
    fn insert_point(
        model: &mut ModelResults,
        scenario: &ScenarioDescriptor,
        country: &Iso3,
        ff: f64,
        window_cost: f64,
        cases: f64,
        deaths: f64,
    ) {
        let fraction = FundingFraction::new(ff).unwrap();
        for year in 2027..=2029 {
            model
                .insert(
                    scenario.clone(),
                    country.clone(),
                    fraction,
                    IndicatorName::cost(),
                    year,
                    Datum::single(window_cost / 3.0),
                )
                .unwrap();
        }
        for (indicator, value) in [(IndicatorName::cases(), cases), (IndicatorName::deaths(), deaths)]
        {
            model
                .insert(
                    scenario.clone(),
                    country.clone(),
                    fraction,
                    indicator,
                    2030,
                    Datum::single(value),
                )
                .unwrap();
        }
    }

    /// Two countries with the worked curves: A costs {0,50,100} against
    /// burden {100,60,40}, B costs {0,30,60} against {80,50,30}. Cases and
    /// deaths carry the same burden; paired with the unnormalised
    /// deaths-only objective this reproduces the raw curves exactly.
    fn two_country_database() -> Database {
        let mut model = ModelResults::new();
        let a = iso("AAA");
        let b = iso("BBB");
        for (country, rows) in [
            (&a, [(0.0, 0.0, 100.0), (0.5, 50.0, 60.0), (1.0, 100.0, 40.0)]),
            (&b, [(0.0, 0.0, 80.0), (0.5, 30.0, 50.0), (1.0, 60.0, 30.0)]),
        ] {
            for (ff, cost, burden) in rows {
                insert_point(&mut model, &ic_scenario(), country, ff, cost, burden, burden);
            }
        }
        Database::new(model, AnnualData::new(), AnnualData::new(), Gp::new())
    }

    fn funding(rows: &[(&str, f64)]) -> TgfFunding {
        let mut table = TgfFunding::new(YearRange::new(2027, 2029).unwrap());
        for (code, amount) in rows {
            table
                .insert(iso(code), Decimal::try_from(*amount).unwrap())
                .unwrap();
        }
        table
    }

    fn two_country_analysis(tgf_total: f64) -> Analysis {
        Analysis::new(
            two_country_database(),
            funding(&[("AAA", tgf_total / 2.0), ("BBB", tgf_total / 2.0)]),
            funding(&[]),
            parameters(&["AAA", "BBB"]),
            ic_scenario(),
        )
        .unwrap()
        .with_objective(Box::new(TotalDeaths))
    }

    #[test]
    fn optimised_allocation_matches_the_worked_example() {
        let analysis = two_country_analysis(100.0);
        let projection = analysis
            .portfolio_projection_approach_b(&SolverOptions::default())
            .unwrap();

        for country in ["AAA", "BBB"] {
            assert_eq!(
                projection.country_projections[&iso(country)]
                    .funding_fraction
                    .value(),
                0.5,
                "{country}"
            );
        }
        assert_eq!(projection.tgf_funding_by_country[&iso("AAA")], 50.0);
        assert_eq!(projection.tgf_funding_by_country[&iso("BBB")], 30.0);

        // Portfolio cases in the objective year: 60 + 50.
        assert_eq!(
            projection.portfolio[&IndicatorName::cases()][&2030].central,
            110.0
        );

        let report = projection.solver.as_ref().unwrap();
        assert!(report.best().tgf_spent <= 100.0);
    }

    #[test]
    fn ample_budget_funds_everything() {
        let analysis = two_country_analysis(1_000.0);
        let projection = analysis
            .portfolio_projection_approach_b(&SolverOptions::default())
            .unwrap();
        for p in projection.country_projections.values() {
            assert_eq!(p.funding_fraction, FundingFraction::ONE);
        }
        assert_eq!(
            projection.portfolio[&IndicatorName::cases()][&2030].central,
            70.0
        );
    }

    #[test]
    fn approach_a_realises_the_budgets_as_given() {
        let analysis = Analysis::new(
            two_country_database(),
            funding(&[("AAA", 50.0), ("BBB", 30.0)]),
            funding(&[]),
            parameters(&["AAA", "BBB"]),
            ic_scenario(),
        )
        .unwrap();
        let projection = analysis.portfolio_projection_approach_a().unwrap();
        assert_eq!(
            projection.country_projections[&iso("AAA")]
                .funding_fraction
                .value(),
            0.5
        );
        assert_eq!(
            projection.country_projections[&iso("BBB")]
                .funding_fraction
                .value(),
            0.5
        );
        assert!(projection.solver.is_none());
    }

    #[test]
    fn counterfactual_differencing_yields_deaths_averted() {
        let mut database = two_country_database();
        // Null scenario stored at full funding only: far higher burden.
        let null = ScenarioDescriptor::new("NULL_NULL");
        for (country, deaths) in [("AAA", 800.0), ("BBB", 400.0)] {
            insert_point(
                &mut database.model_results,
                &null,
                &iso(country),
                1.0,
                0.0,
                0.0,
                deaths,
            );
        }
        // Give the investment case some deaths too: 300 + 200.
        let analysis = Analysis::new(
            database,
            funding(&[("AAA", 500.0), ("BBB", 500.0)]),
            funding(&[]),
            parameters(&["AAA", "BBB"]),
            ic_scenario(),
        )
        .unwrap();

        let cf = analysis
            .portfolio_projection_counterfactual(CounterfactualKind::Null)
            .unwrap();
        assert_eq!(
            cf.portfolio[&IndicatorName::deaths()][&2030].central,
            1200.0
        );

        let ic = analysis
            .portfolio_projection_approach_b(&SolverOptions::default())
            .unwrap();
        let mut ic_with_deaths = ic;
        // Graft the 500-deaths portfolio the worked example uses.
        if let Some(series) = ic_with_deaths.portfolio.get_mut(&IndicatorName::deaths()) {
            series.insert(2030, Datum::single(500.0));
        }

        let saved = averted(&cf, &ic_with_deaths, &IndicatorName::deaths());
        assert_eq!(saved[&2030].central, 700.0);
    }

    #[test]
    fn excluded_country_degrades_with_diagnostic() {
        // BBB is declared modelled but has no model rows at all.
        let analysis = Analysis::new(
            {
                let mut model = ModelResults::new();
                for (ff, cost, cases) in
                    [(0.0, 0.0, 100.0), (0.5, 50.0, 60.0), (1.0, 100.0, 40.0)]
                {
                    insert_point(&mut model, &ic_scenario(), &iso("AAA"), ff, cost, cases, 0.0);
                }
                Database::new(model, AnnualData::new(), AnnualData::new(), Gp::new())
            },
            funding(&[("AAA", 100.0)]),
            funding(&[]),
            parameters(&["AAA", "BBB"]),
            ic_scenario(),
        )
        .unwrap();

        let projection = analysis
            .portfolio_projection_approach_b(&SolverOptions::default())
            .unwrap();
        assert!(projection.country_projections.contains_key(&iso("AAA")));
        assert!(!projection.country_projections.contains_key(&iso("BBB")));
        assert!(projection.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::CountryExcluded { country, .. } if country == &iso("BBB")
        )));
    }

    #[test]
    fn run_analysis_entry_point_round_trips() {
        let projection = run_analysis(
            parameters(&["AAA", "BBB"]),
            AnalysisInputs {
                database: two_country_database(),
                tgf_funding: funding(&[("AAA", 50.0), ("BBB", 50.0)]),
                non_tgf_funding: funding(&[]),
            },
            ic_scenario(),
        )
        .unwrap();
        assert_eq!(projection.country_projections.len(), 2);
    }

    #[test]
    fn set_of_projections_feeds_the_report() {
        let mut database = two_country_database();
        for scenario in ["NULL_NULL", "CC_CC"] {
            let descriptor = ScenarioDescriptor::new(scenario);
            for (country, deaths) in [("AAA", 800.0), ("BBB", 400.0)] {
                insert_point(
                    &mut database.model_results,
                    &descriptor,
                    &iso(country),
                    1.0,
                    0.0,
                    500.0,
                    deaths,
                );
            }
        }
        let analysis = Analysis::new(
            database,
            funding(&[("AAA", 50.0), ("BBB", 50.0)]),
            funding(&[]),
            parameters(&["AAA", "BBB"]),
            ic_scenario(),
        )
        .unwrap()
        .with_adjustments(Box::new(DefaultAdjustments::new("hiv")))
        .with_objective(Box::new(TotalDeaths));

        let set = analysis
            .set_of_portfolio_projections(&SolverOptions::default())
            .unwrap();
        assert!(set.cf_lives_saved_override.is_none());
        assert!(set.info.iter().any(|(k, v)| k == "disease" && v == "hiv"));

        let report = Report::from_projections(&set, &analysis.parameters);
        assert_eq!(report.scalar("total_cases_2024_2030"), Some(110.0));
        // Null-scenario deaths 1200 against the 110 projected: 1090 averted.
        assert_eq!(report.scalar("deaths_averted_2024_2030"), Some(1090.0));
    }
}
