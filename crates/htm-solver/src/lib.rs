#![deny(warnings)]

//! Budget-constrained allocation across countries.
//!
//! Two greedy marginal-benefit methods over the discrete operating points of
//! each country's (frontier-filtered) cost-impact curve: `ga_backwards`
//! walks down from full funding while the donor budget is exceeded,
//! `ga_forwards` walks up from the co-financing floor while money remains.
//! Both are run and the lower-objective allocation is selected.
//!
//! Steps are applied sequentially and deterministically; score ties resolve
//! by country name ascending, then funding fraction ascending, so outputs
//! are reproducible across platforms.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use htm_core::{Diagnostic, FundingFraction, Iso3};
use htm_curves::CurvePoint;

/// Feasibility slack for floating-point budget comparisons.
const BUDGET_EPS: f64 = 1e-9;

/// One country's discrete cost-impact curve presented to the solver.
///
/// Points must be strictly increasing in funding fraction; `cost` is the
/// funding-window total and `objective` the injected score to minimise.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CountryCurve {
    pub country: Iso3,
    pub points: Vec<CurvePoint>,
    pub non_tgf: f64,
}

/// The two allocation methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    GaForwards,
    GaBackwards,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::GaForwards => f.write_str("ga_forwards"),
            Method::GaBackwards => f.write_str("ga_backwards"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverOptions {
    pub methods: Vec<Method>,
    /// Project each objective curve onto its running minimum so more money
    /// never buys a strictly worse outcome.
    pub force_monotonic_decreasing: bool,
    /// Step budget; on exhaustion the current best allocation is returned
    /// with a `Timeout` warning.
    pub max_steps: Option<usize>,
    /// Keep only the lower-objective run in the report.
    pub provide_best_only: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            methods: vec![Method::GaBackwards, Method::GaForwards],
            force_monotonic_decreasing: false,
            max_steps: None,
            provide_best_only: true,
        }
    }
}

/// Progress of one country through a solve.
///
/// `Init -> Floor | Ceiling -> Stepped* -> Fixed`; a country is `Fixed` once
/// no further legal step exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountryState {
    Init,
    Floor,
    Ceiling,
    Stepped,
    Fixed,
}

/// One applied reallocation step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub country: Iso3,
    pub from: FundingFraction,
    pub to: FundingFraction,
    pub delta_cost: f64,
    pub delta_objective: f64,
}

/// Where one country ended up.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CountryAllocation {
    pub funding_fraction: FundingFraction,
    /// Funding-window cost at the chosen point.
    pub cost: f64,
    pub non_tgf: f64,
    /// Donor share: cost less co-financing, floored at zero.
    pub tgf: f64,
    pub objective: f64,
    pub state: CountryState,
}

/// The outcome of one method run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Allocation {
    pub method: Method,
    pub by_country: BTreeMap<Iso3, CountryAllocation>,
    pub objective: f64,
    pub total_cost: f64,
    pub tgf_spent: f64,
    pub steps: Vec<StepRecord>,
    pub warnings: Vec<Diagnostic>,
}

/// Results of all requested methods plus curve-preparation warnings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverReport {
    pub runs: Vec<Allocation>,
    pub warnings: Vec<Diagnostic>,
}

impl SolverReport {
    /// The lower-objective run; earlier runs win exact ties.
    pub fn best(&self) -> &Allocation {
        let (first, rest) = self
            .runs
            .split_first()
            .expect("solver report always holds at least one run");
        rest.iter().fold(first, |best, run| {
            if run.objective < best.objective {
                run
            } else {
                best
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("no countries to allocate across")]
    EmptyPortfolio,
    #[error("{0} has no feasible operating points")]
    NoFeasiblePoints(Iso3),
    #[error("{country}: operating points must be strictly increasing in funding fraction")]
    UnsortedCurve { country: Iso3 },
    #[error("{country}: non-finite cost, objective or co-financing")]
    NonFinite { country: Iso3 },
}

/// Projects the objective onto its running minimum, left to right, so it is
/// non-increasing in funding fraction.
pub fn enforce_monotonic_decreasing(points: &mut [CurvePoint]) {
    let mut best = f64::INFINITY;
    for point in points.iter_mut() {
        if point.objective < best {
            best = point.objective;
        } else {
            point.objective = best;
        }
    }
}

struct Prepared {
    country: Iso3,
    points: Vec<CurvePoint>,
    non_tgf: f64,
    floor: usize,
}

fn tgf_need(cost: f64, non_tgf: f64) -> f64 {
    (cost - non_tgf).max(0.0)
}

fn prepare(
    curves: &[CountryCurve],
    force_monotonic: bool,
) -> Result<(Vec<Prepared>, Vec<Diagnostic>), SolverError> {
    let mut warnings = Vec::new();
    let mut prepared = Vec::with_capacity(curves.len());

    for curve in curves {
        if curve.points.is_empty() {
            return Err(SolverError::NoFeasiblePoints(curve.country.clone()));
        }
        for pair in curve.points.windows(2) {
            if pair[1].funding_fraction <= pair[0].funding_fraction {
                return Err(SolverError::UnsortedCurve {
                    country: curve.country.clone(),
                });
            }
        }
        if !curve.non_tgf.is_finite()
            || curve
                .points
                .iter()
                .any(|p| !p.cost.is_finite() || !p.objective.is_finite())
        {
            return Err(SolverError::NonFinite {
                country: curve.country.clone(),
            });
        }

        let mut points = curve.points.clone();
        if force_monotonic {
            enforce_monotonic_decreasing(&mut points);
        }

        // The co-financing floor, rounded up to the first stored point whose
        // cost covers it. Co-financing beyond the full programme pins the
        // country at its ceiling with the excess left unallocated.
        let floor = match points.iter().position(|p| p.cost >= curve.non_tgf) {
            Some(ix) => ix,
            None => {
                let last = points.len() - 1;
                warnings.push(Diagnostic::FullyFundedByNonTgf {
                    country: curve.country.clone(),
                    excess: curve.non_tgf - points[last].cost,
                });
                last
            }
        };

        prepared.push(Prepared {
            country: curve.country.clone(),
            points,
            non_tgf: curve.non_tgf,
            floor,
        });
    }

    prepared.sort_by(|a, b| a.country.cmp(&b.country));
    Ok((prepared, warnings))
}

fn build_allocation(
    method: Method,
    prepared: &[Prepared],
    chosen: &[usize],
    states: &[CountryState],
    steps: Vec<StepRecord>,
    warnings: Vec<Diagnostic>,
) -> Allocation {
    let mut by_country = BTreeMap::new();
    let mut objective = 0.0;
    let mut total_cost = 0.0;
    let mut tgf_spent = 0.0;
    for (i, (p, &ix)) in prepared.iter().zip(chosen).enumerate() {
        let point = p.points[ix];
        let tgf = tgf_need(point.cost, p.non_tgf);
        objective += point.objective;
        total_cost += point.cost;
        tgf_spent += tgf;
        by_country.insert(
            p.country.clone(),
            CountryAllocation {
                funding_fraction: point.funding_fraction,
                cost: point.cost,
                non_tgf: p.non_tgf,
                tgf,
                objective: point.objective,
                state: states[i],
            },
        );
    }
    Allocation {
        method,
        by_country,
        objective,
        total_cost,
        tgf_spent,
        steps,
        warnings,
    }
}

/// Start everyone fully funded and walk down the steps that save the most
/// donor money per unit of objective worsening until the budget holds.
fn ga_backwards(prepared: &[Prepared], tgf_budget: f64, max_steps: Option<usize>) -> Allocation {
    let mut chosen: Vec<usize> = prepared.iter().map(|p| p.points.len() - 1).collect();
    let mut states: Vec<CountryState> = vec![CountryState::Ceiling; prepared.len()];
    let mut spend: f64 = prepared
        .iter()
        .zip(&chosen)
        .map(|(p, &ix)| tgf_need(p.points[ix].cost, p.non_tgf))
        .sum();
    let mut steps = Vec::new();
    let mut warnings = Vec::new();

    while spend - tgf_budget > BUDGET_EPS {
        if max_steps.is_some_and(|limit| steps.len() >= limit) {
            warnings.push(Diagnostic::Timeout { steps: steps.len() });
            break;
        }

        // Greatest saved dollars per unit of objective worsening; ties keep
        // the first candidate in country order.
        let mut best: Option<(usize, f64)> = None;
        for (i, p) in prepared.iter().enumerate() {
            let ix = chosen[i];
            if ix == p.floor {
                continue;
            }
            let saved = tgf_need(p.points[ix].cost, p.non_tgf)
                - tgf_need(p.points[ix - 1].cost, p.non_tgf);
            let worsened = p.points[ix - 1].objective - p.points[ix].objective;
            let score = if worsened <= 0.0 {
                f64::INFINITY
            } else {
                saved / worsened
            };
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let Some((i, _)) = best else {
            warnings.push(Diagnostic::BudgetInfeasible {
                shortfall: spend - tgf_budget,
            });
            break;
        };

        let p = &prepared[i];
        let ix = chosen[i];
        let from = p.points[ix];
        let to = p.points[ix - 1];
        spend += tgf_need(to.cost, p.non_tgf) - tgf_need(from.cost, p.non_tgf);
        chosen[i] = ix - 1;
        states[i] = CountryState::Stepped;
        steps.push(StepRecord {
            step: steps.len(),
            country: p.country.clone(),
            from: from.funding_fraction,
            to: to.funding_fraction,
            delta_cost: to.cost - from.cost,
            delta_objective: to.objective - from.objective,
        });
        debug!(country = %p.country, to = %to.funding_fraction, spend, "step down");
    }

    for state in &mut states {
        *state = CountryState::Fixed;
    }
    build_allocation(Method::GaBackwards, prepared, &chosen, &states, steps, warnings)
}

/// Start everyone at the co-financing floor and walk up the affordable steps
/// that buy the most objective improvement per donor dollar.
fn ga_forwards(prepared: &[Prepared], tgf_budget: f64, max_steps: Option<usize>) -> Allocation {
    let mut chosen: Vec<usize> = prepared.iter().map(|p| p.floor).collect();
    let mut states: Vec<CountryState> = vec![CountryState::Floor; prepared.len()];
    let mut spend: f64 = prepared
        .iter()
        .zip(&chosen)
        .map(|(p, &ix)| tgf_need(p.points[ix].cost, p.non_tgf))
        .sum();
    let mut steps = Vec::new();
    let mut warnings = Vec::new();

    if spend - tgf_budget > BUDGET_EPS {
        // The floors alone overrun the budget; report the best-effort floor
        // allocation rather than aborting.
        warnings.push(Diagnostic::BudgetInfeasible {
            shortfall: spend - tgf_budget,
        });
    } else {
        loop {
            if max_steps.is_some_and(|limit| steps.len() >= limit) {
                warnings.push(Diagnostic::Timeout { steps: steps.len() });
                break;
            }

            let mut best: Option<(usize, f64)> = None;
            for (i, p) in prepared.iter().enumerate() {
                let ix = chosen[i];
                if ix + 1 >= p.points.len() {
                    continue;
                }
                let added = tgf_need(p.points[ix + 1].cost, p.non_tgf)
                    - tgf_need(p.points[ix].cost, p.non_tgf);
                if spend + added - tgf_budget > BUDGET_EPS {
                    continue;
                }
                let gained = p.points[ix].objective - p.points[ix + 1].objective;
                if gained <= 0.0 {
                    continue;
                }
                let score = if added <= 0.0 {
                    f64::INFINITY
                } else {
                    gained / added
                };
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((i, score));
                }
            }

            let Some((i, _)) = best else {
                break;
            };

            let p = &prepared[i];
            let ix = chosen[i];
            let from = p.points[ix];
            let to = p.points[ix + 1];
            spend += tgf_need(to.cost, p.non_tgf) - tgf_need(from.cost, p.non_tgf);
            chosen[i] = ix + 1;
            states[i] = CountryState::Stepped;
            steps.push(StepRecord {
                step: steps.len(),
                country: p.country.clone(),
                from: from.funding_fraction,
                to: to.funding_fraction,
                delta_cost: to.cost - from.cost,
                delta_objective: to.objective - from.objective,
            });
            debug!(country = %p.country, to = %to.funding_fraction, spend, "step up");
        }
    }

    for state in &mut states {
        *state = CountryState::Fixed;
    }
    build_allocation(Method::GaForwards, prepared, &chosen, &states, steps, warnings)
}

/// Runs the requested methods over the prepared curves and selects the
/// lower-objective allocation.
pub fn solve(
    curves: &[CountryCurve],
    tgf_budget: f64,
    options: &SolverOptions,
) -> Result<SolverReport, SolverError> {
    if curves.is_empty() {
        return Err(SolverError::EmptyPortfolio);
    }
    let (prepared, warnings) = prepare(curves, options.force_monotonic_decreasing)?;

    let methods: &[Method] = if options.methods.is_empty() {
        &[Method::GaBackwards, Method::GaForwards]
    } else {
        &options.methods
    };

    let mut runs: Vec<Allocation> = methods
        .iter()
        .map(|method| match method {
            Method::GaBackwards => ga_backwards(&prepared, tgf_budget, options.max_steps),
            Method::GaForwards => ga_forwards(&prepared, tgf_budget, options.max_steps),
        })
        .collect();

    if options.provide_best_only && runs.len() > 1 {
        let mut best_ix = 0;
        for (ix, run) in runs.iter().enumerate().skip(1) {
            if run.objective < runs[best_ix].objective {
                best_ix = ix;
            }
        }
        let best = runs.swap_remove(best_ix);
        runs = vec![best];
    }

    let report = SolverReport { runs, warnings };
    let best = report.best();
    info!(
        method = %best.method,
        objective = best.objective,
        tgf_spent = best.tgf_spent,
        "allocation selected"
    );
    Ok(report)
}
