//! Realising a chosen funding level into a calibrated country trajectory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use htm_core::{
    Database, Datum, Diagnostic, FundingFraction, IndicatorFrame, IndicatorName, Iso3,
    Parameters, ScenarioDescriptor, Year,
};

/// One country's realised result: the chosen operating point, the raw model
/// trajectory and the calibrated trajectory, plus anything that went
/// sideways on the way.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CountryProjection {
    pub country: Iso3,
    pub funding_fraction: FundingFraction,
    /// Funding-window cost at the chosen point.
    pub cost: f64,
    pub tgf: f64,
    pub non_tgf: f64,
    /// Trajectory exactly as the emulator produced it.
    pub model_projection: IndicatorFrame,
    /// Trajectory after partner calibration, innovation and cost handling.
    pub model_projection_adj: IndicatorFrame,
    pub diagnostics: Vec<Diagnostic>,
}

pub(crate) struct ProjectionContext<'a> {
    pub database: &'a Database,
    pub parameters: &'a Parameters,
    pub scenario: &'a ScenarioDescriptor,
    pub innovation_on: bool,
    pub handle_out_of_bounds_costs: bool,
}

/// Builds the calibrated projection from a raw emulator frame.
///
/// The raw frame stays the source of truth; every adjustment is applied to a
/// fresh copy.
pub(crate) fn project_frame(
    ctx: &ProjectionContext<'_>,
    country: &Iso3,
    raw: IndicatorFrame,
    funding_fraction: FundingFraction,
    cost: f64,
    tgf: f64,
    non_tgf: f64,
    mut diagnostics: Vec<Diagnostic>,
) -> CountryProjection {
    let mut adj = raw.clone();

    // Partner calibration: pin the model to reported reality at the last
    // partner year, carrying the ratio across the whole projection.
    for def in &ctx.parameters.indicators {
        if !def.use_scaling {
            continue;
        }
        let ratio = calibration_ratio(ctx, country, &def.name, &raw);
        match ratio {
            Some(r) => adj.scale_indicator(&def.name, r),
            None => diagnostics.push(Diagnostic::CalibrationMissing {
                country: country.clone(),
                indicator: def.name.clone(),
            }),
        }
    }

    // Forward-looking reductions for novel interventions, parameter-driven.
    if ctx.innovation_on {
        for factor in &ctx.parameters.innovation_factors {
            adj.scale_value(&factor.indicator, factor.year, factor.factor);
        }
    }

    if ctx.handle_out_of_bounds_costs {
        if let Some(clamped) = clamp_cost_to_envelope(ctx, country, &mut adj) {
            diagnostics.push(Diagnostic::CostClamped {
                country: country.clone(),
                amount: clamped,
            });
        }
    }

    debug!(%country, ff = %funding_fraction, "country projected");
    CountryProjection {
        country: country.clone(),
        funding_fraction,
        cost,
        tgf,
        non_tgf,
        model_projection: raw,
        model_projection_adj: adj,
        diagnostics,
    }
}

/// `partner(base_year) / model(base_year)`, or `None` when the partner
/// anchor is missing or zero and the ratio must fall through to 1.
fn calibration_ratio(
    ctx: &ProjectionContext<'_>,
    country: &Iso3,
    indicator: &IndicatorName,
    raw: &IndicatorFrame,
) -> Option<f64> {
    let (base_year, partner_value) = ctx
        .database
        .partner_data
        .latest(ctx.scenario, country, indicator)
        .ok()?;
    if partner_value == 0.0 {
        return None;
    }
    let model = raw.get(indicator, base_year).ok()?;
    if model.central <= 0.0 {
        return None;
    }
    Some(partner_value / model.central)
}

/// Clamps the adjusted cost trajectory back inside the stored per-year
/// envelope; returns the total amount removed, if any.
fn clamp_cost_to_envelope(
    ctx: &ProjectionContext<'_>,
    country: &Iso3,
    adj: &mut IndicatorFrame,
) -> Option<f64> {
    let cost = IndicatorName::cost();
    let block = ctx
        .database
        .model_results
        .country_block(ctx.scenario, country)
        .ok()?;

    let mut envelope: BTreeMap<Year, f64> = BTreeMap::new();
    for frame in block.values() {
        if let Ok(series) = frame.series(&cost) {
            for (year, datum) in series {
                let ceiling = envelope.entry(*year).or_insert(f64::NEG_INFINITY);
                *ceiling = ceiling.max(datum.central);
            }
        }
    }

    let series = adj.series(&cost).ok()?.clone();
    let mut removed = 0.0;
    for (year, datum) in series {
        let Some(&ceiling) = envelope.get(&year) else {
            continue;
        };
        if datum.central > ceiling {
            removed += datum.central - ceiling;
            let clamped = if datum.central > 0.0 {
                datum.scaled(ceiling / datum.central)
            } else {
                Datum::single(ceiling)
            };
            let _ = adj.replace(&cost, year, clamped);
        }
    }
    (removed > 0.0).then_some(removed)
}
