//! One analysis run: a database, funding assumptions and parameters, and
//! the operations that turn them into portfolio projections.

use std::collections::BTreeMap;
use tracing::{info, warn};

use htm_core::{
    CounterfactualKind, Database, Diagnostic, FundingFraction, Gp, IndicatorName, Iso3,
    NonTgfFunding, Parameters, PartnerData, ScenarioDescriptor, TgfFunding, Year,
};
use htm_curves::{filter_dominated, BoundsPolicy, CurvePoint, Emulator};
use htm_solver::{solve, CountryCurve, SolverOptions};

use crate::counterfactual::{DefaultAdjustments, DiseaseAdjustments};
use crate::objective::{combine, CasesAndDeaths, Objective};
use crate::portfolio::{aggregate, PortfolioProjection};
use crate::projection::{project_frame, CountryProjection, ProjectionContext};
use crate::AnalysisError;

/// The decided configuration for one investment case and its reference
/// counterfactuals, bundled for reporting.
pub struct SetOfPortfolioProjections {
    pub ic: PortfolioProjection,
    /// Null scenario: the lives-saved reference.
    pub cf_lives_saved: PortfolioProjection,
    /// Constant-coverage scenario: the infections-averted reference.
    pub cf_infections_averted: PortfolioProjection,
    /// Disease-specific override from a fixed historical mortality rate.
    pub cf_lives_saved_override: Option<BTreeMap<Year, f64>>,
    /// Disease-specific override from a fixed historical incidence rate.
    pub cf_infections_averted_override: Option<BTreeMap<Year, f64>>,
    pub partner: PartnerData,
    pub gp: Gp,
    pub info: Vec<(String, String)>,
}

/// An analysis owns its inputs exclusively for its lifetime; run several
/// analyses in parallel workers if needed, never one across threads.
pub struct Analysis {
    pub database: Database,
    pub tgf_funding: TgfFunding,
    pub non_tgf_funding: NonTgfFunding,
    pub parameters: Parameters,
    pub scenario_descriptor: ScenarioDescriptor,
    pub innovation_on: bool,
    pub handle_out_of_bounds_costs: bool,
    adjustments: Box<dyn DiseaseAdjustments>,
    objective: Box<dyn Objective>,
}

impl Analysis {
    pub fn new(
        database: Database,
        tgf_funding: TgfFunding,
        non_tgf_funding: NonTgfFunding,
        parameters: Parameters,
        scenario_descriptor: ScenarioDescriptor,
    ) -> Result<Self, AnalysisError> {
        parameters.validate()?;
        if database.model_results.is_empty() {
            return Err(AnalysisError::NoInputs);
        }
        database
            .model_results
            .validate_scenario(&scenario_descriptor)?;

        let innovation_on = parameters.innovation_on;
        let handle_out_of_bounds_costs = parameters.handle_out_of_bounds_costs;
        Ok(Self {
            database,
            tgf_funding,
            non_tgf_funding,
            parameters,
            scenario_descriptor,
            innovation_on,
            handle_out_of_bounds_costs,
            adjustments: Box::new(DefaultAdjustments::new("unspecified")),
            objective: Box::new(CasesAndDeaths),
        })
    }

    /// Swaps in the per-disease strategy (innovation, counterfactual hooks).
    pub fn with_adjustments(mut self, adjustments: Box<dyn DiseaseAdjustments>) -> Self {
        self.adjustments = adjustments;
        self
    }

    /// Swaps in the allocation objective.
    pub fn with_objective(mut self, objective: Box<dyn Objective>) -> Self {
        self.objective = objective;
        self
    }

    /// Overrides the projection-construction flags for this run.
    pub fn with_options(mut self, innovation_on: bool, handle_out_of_bounds_costs: bool) -> Self {
        self.innovation_on = innovation_on;
        self.handle_out_of_bounds_costs = handle_out_of_bounds_costs;
        self
    }

    fn context<'a>(&'a self, scenario: &'a ScenarioDescriptor) -> ProjectionContext<'a> {
        ProjectionContext {
            database: &self.database,
            parameters: &self.parameters,
            scenario,
            innovation_on: self.innovation_on,
            handle_out_of_bounds_costs: self.handle_out_of_bounds_costs,
        }
    }

    fn emulator(&self, country: &Iso3, bounds: BoundsPolicy) -> Result<Emulator<'_>, AnalysisError> {
        Ok(Emulator::new(
            &self.database.model_results,
            &self.scenario_descriptor,
            country,
            self.parameters.years_for_funding,
            bounds,
        )?)
    }

    /// Builds frontier-filtered operating curves per modelled country.
    /// Countries that cannot be prepared are degraded to diagnostics.
    fn build_curves(&self) -> (Vec<CountryCurve>, Vec<Diagnostic>) {
        let cost = IndicatorName::cost();
        let mut curves = Vec::new();
        let mut diagnostics = Vec::new();

        'countries: for country in &self.parameters.modelled_countries {
            if let Err(err) = self.emulator(country, BoundsPolicy::Strict) {
                warn!(%country, %err, "country excluded from optimisation");
                diagnostics.push(Diagnostic::CountryExcluded {
                    country: country.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
            let block = match self
                .database
                .model_results
                .country_block(&self.scenario_descriptor, country)
            {
                Ok(block) => block,
                Err(err) => {
                    diagnostics.push(Diagnostic::CountryExcluded {
                        country: country.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let mut points = Vec::with_capacity(block.len());
            let mut components = Vec::with_capacity(block.len());
            for (fraction, frame) in block {
                let point_cost = match frame.total(&cost, &self.parameters.years_for_funding) {
                    Ok(c) => c,
                    Err(err) => {
                        diagnostics.push(Diagnostic::CountryExcluded {
                            country: country.clone(),
                            reason: err.to_string(),
                        });
                        continue 'countries;
                    }
                };
                match self
                    .objective
                    .components(frame, &self.parameters.years_for_obj_func)
                {
                    Ok(c) => components.push(c),
                    Err(err) => {
                        diagnostics.push(Diagnostic::CountryExcluded {
                            country: country.clone(),
                            reason: err.to_string(),
                        });
                        continue 'countries;
                    }
                }
                points.push((*fraction, point_cost));
            }

            let objectives = combine(&components, self.objective.normalise_per_country());
            let curve: Vec<CurvePoint> = points
                .into_iter()
                .zip(objectives)
                .map(|((funding_fraction, point_cost), objective)| CurvePoint {
                    funding_fraction,
                    cost: point_cost,
                    objective,
                })
                .collect();

            curves.push(CountryCurve {
                country: country.clone(),
                points: filter_dominated(&curve),
                non_tgf: self.non_tgf_funding.amount_or_zero(country),
            });
        }

        (curves, diagnostics)
    }

    fn assemble(
        &self,
        scenario: &ScenarioDescriptor,
        projections: BTreeMap<Iso3, CountryProjection>,
        mut diagnostics: Vec<Diagnostic>,
        solver: Option<htm_solver::SolverReport>,
    ) -> Result<PortfolioProjection, AnalysisError> {
        if projections.is_empty() {
            return Err(AnalysisError::EmptyPortfolio);
        }
        for projection in projections.values() {
            diagnostics.extend(projection.diagnostics.iter().cloned());
        }
        let (portfolio, aggregation_diagnostics) =
            aggregate(&projections, &self.database, scenario, &self.parameters);
        diagnostics.extend(aggregation_diagnostics);

        let tgf_funding_by_country = projections
            .iter()
            .map(|(c, p)| (c.clone(), p.tgf))
            .collect();
        let non_tgf_funding_by_country = projections
            .iter()
            .map(|(c, p)| (c.clone(), p.non_tgf))
            .collect();

        Ok(PortfolioProjection {
            scenario_descriptor: scenario.clone(),
            country_projections: projections,
            portfolio,
            tgf_funding_by_country,
            non_tgf_funding_by_country,
            solver,
            diagnostics,
        })
    }

    /// Approach A: realise the funding assumptions exactly as given, with no
    /// optimisation. Each country is funded at its donor plus co-financing
    /// dollars; amounts outside the modelled envelope clamp with a flag.
    pub fn portfolio_projection_approach_a(&self) -> Result<PortfolioProjection, AnalysisError> {
        info!(scenario = %self.scenario_descriptor, "approach A projection");
        let mut projections = BTreeMap::new();
        let mut diagnostics = Vec::new();
        let ctx = self.context(&self.scenario_descriptor);

        for country in &self.parameters.modelled_countries {
            let tgf = self.tgf_funding.amount_or_zero(country);
            let non_tgf = self.non_tgf_funding.amount_or_zero(country);
            let dollars = tgf + non_tgf;

            let outcome = (|| {
                let emulator = self.emulator(country, BoundsPolicy::Clamp)?;
                let fraction = emulator.fraction_for_dollars(dollars)?;
                let frame = emulator.get(fraction.value())?;
                let point_cost = emulator.total_cost(fraction.value())?;
                let mut flags = Vec::new();
                let full = emulator.cost_at_full_funding();
                if frame.clamped || (full > 0.0 && (dollars / full - fraction.value()).abs() > 1e-12)
                {
                    flags.push(Diagnostic::FractionClamped {
                        country: country.clone(),
                        requested: if full > 0.0 { dollars / full } else { 0.0 },
                        used: fraction.value(),
                    });
                }
                Ok::<_, AnalysisError>(project_frame(
                    &ctx,
                    country,
                    frame.frame,
                    fraction,
                    point_cost,
                    tgf,
                    non_tgf,
                    flags,
                ))
            })();

            match outcome {
                Ok(projection) => {
                    projections.insert(country.clone(), projection);
                }
                Err(err) => {
                    warn!(%country, %err, "country excluded from approach A");
                    diagnostics.push(Diagnostic::CountryExcluded {
                        country: country.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.assemble(
            &self.scenario_descriptor,
            projections,
            diagnostics,
            None,
        )
    }

    /// Approach B: frontier-filter each country's curve, let the solver
    /// choose the operating points, then realise and aggregate them.
    pub fn portfolio_projection_approach_b(
        &self,
        options: &SolverOptions,
    ) -> Result<PortfolioProjection, AnalysisError> {
        info!(scenario = %self.scenario_descriptor, "approach B optimisation");
        let (curves, mut diagnostics) = self.build_curves();
        if curves.is_empty() {
            return Err(AnalysisError::EmptyPortfolio);
        }

        let report = solve(&curves, self.tgf_funding.total(), options)?;
        diagnostics.extend(report.warnings.iter().cloned());
        let best = report.best().clone();
        diagnostics.extend(best.warnings.iter().cloned());

        let ctx = self.context(&self.scenario_descriptor);
        let mut projections = BTreeMap::new();
        for (country, allocation) in &best.by_country {
            let emulator = self.emulator(country, BoundsPolicy::Strict)?;
            let frame = emulator.get(allocation.funding_fraction.value())?;
            let projection = project_frame(
                &ctx,
                country,
                frame.frame,
                allocation.funding_fraction,
                allocation.cost,
                allocation.tgf,
                allocation.non_tgf,
                Vec::new(),
            );
            projections.insert(country.clone(), projection);
        }

        self.assemble(
            &self.scenario_descriptor,
            projections,
            diagnostics,
            Some(report),
        )
    }

    /// Evaluates a reference scenario through the same projection pipeline,
    /// every country at full funding.
    pub fn portfolio_projection_counterfactual(
        &self,
        kind: CounterfactualKind,
    ) -> Result<PortfolioProjection, AnalysisError> {
        let scenario = self.parameters.counterfactual(kind).clone();
        info!(%scenario, "counterfactual projection");
        let cost = IndicatorName::cost();
        let ctx = self.context(&scenario);
        let mut projections = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for country in &self.parameters.modelled_countries {
            match self
                .database
                .model_results
                .frame(&scenario, country, FundingFraction::ONE)
            {
                Ok(frame) => {
                    let point_cost = frame
                        .total(&cost, &self.parameters.years_for_funding)
                        .unwrap_or(0.0);
                    let projection = project_frame(
                        &ctx,
                        country,
                        frame.clone(),
                        FundingFraction::ONE,
                        point_cost,
                        0.0,
                        0.0,
                        Vec::new(),
                    );
                    projections.insert(country.clone(), projection);
                }
                Err(err) => {
                    diagnostics.push(Diagnostic::CountryExcluded {
                        country: country.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.assemble(&scenario, projections, diagnostics, None)
    }

    /// The investment case plus its counterfactual references and run
    /// metadata, ready for reporting.
    pub fn set_of_portfolio_projections(
        &self,
        options: &SolverOptions,
    ) -> Result<SetOfPortfolioProjections, AnalysisError> {
        let ic = self.portfolio_projection_approach_b(options)?;
        let cf_lives_saved =
            self.portfolio_projection_counterfactual(CounterfactualKind::Null)?;
        let cf_infections_averted =
            self.portfolio_projection_counterfactual(CounterfactualKind::ConstantCoverage)?;
        let cf_lives_saved_override = self.adjustments.lives_saved_against_baseline(
            &ic,
            &self.database.partner_data,
            &self.scenario_descriptor,
        );
        let cf_infections_averted_override = self.adjustments.infections_averted_against_baseline(
            &ic,
            &self.database.partner_data,
            &self.scenario_descriptor,
        );

        let info = vec![
            ("disease".to_string(), self.adjustments.disease().to_string()),
            (
                "scenario".to_string(),
                self.scenario_descriptor.to_string(),
            ),
            (
                "years_for_funding".to_string(),
                self.parameters.years_for_funding.to_string(),
            ),
            (
                "innovation_applied".to_string(),
                self.innovation_on.to_string(),
            ),
            (
                "out_of_bounds_costs_handled".to_string(),
                self.handle_out_of_bounds_costs.to_string(),
            ),
        ];

        Ok(SetOfPortfolioProjections {
            ic,
            cf_lives_saved,
            cf_infections_averted,
            cf_lives_saved_override,
            cf_infections_averted_override,
            partner: self.database.partner_data.clone(),
            gp: self.database.gp.clone(),
            info,
        })
    }
}
