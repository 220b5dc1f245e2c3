//! Objective-function strategies injected into the solver.

use htm_core::{DataError, IndicatorFrame, IndicatorName, YearRange};

/// Scores one country trajectory for the allocation objective.
///
/// `components` returns the raw burden totals for one operating point; the
/// curve builder combines them across points, optionally normalising each
/// component by the country's worst value so that every country contributes
/// a dimensionless fraction-of-worst score. Without that, large-burden
/// countries dominate the portfolio objective.
pub trait Objective: Send + Sync {
    fn components(&self, frame: &IndicatorFrame, years: &YearRange) -> Result<Vec<f64>, DataError>;

    fn normalise_per_country(&self) -> bool {
        true
    }
}

/// Default objective: cases and deaths, equally weighted after per-country
/// normalisation.
#[derive(Clone, Copy, Debug, Default)]
pub struct CasesAndDeaths;

impl Objective for CasesAndDeaths {
    fn components(&self, frame: &IndicatorFrame, years: &YearRange) -> Result<Vec<f64>, DataError> {
        Ok(vec![
            frame.total(&IndicatorName::cases(), years)?,
            frame.total(&IndicatorName::deaths(), years)?,
        ])
    }
}

/// Unnormalised total deaths, for runs that compete programmes across
/// diseases where absolute burden is the point.
#[derive(Clone, Copy, Debug, Default)]
pub struct TotalDeaths;

impl Objective for TotalDeaths {
    fn components(&self, frame: &IndicatorFrame, years: &YearRange) -> Result<Vec<f64>, DataError> {
        Ok(vec![frame.total(&IndicatorName::deaths(), years)?])
    }

    fn normalise_per_country(&self) -> bool {
        false
    }
}

/// Collapses per-point component vectors into scalar objectives.
///
/// With normalisation, each component is weighted by the reciprocal of its
/// maximum across the country's points; a component that is zero everywhere
/// contributes nothing.
pub fn combine(components_per_point: &[Vec<f64>], normalise: bool) -> Vec<f64> {
    let Some(first) = components_per_point.first() else {
        return Vec::new();
    };
    let n_components = first.len();

    let weights: Vec<f64> = (0..n_components)
        .map(|k| {
            if !normalise {
                return 1.0;
            }
            let max = components_per_point
                .iter()
                .map(|c| c[k])
                .fold(f64::NEG_INFINITY, f64::max);
            if max > 0.0 {
                1.0 / max
            } else {
                0.0
            }
        })
        .collect();

    components_per_point
        .iter()
        .map(|c| c.iter().zip(&weights).map(|(v, w)| v * w).sum())
        .collect()
}
