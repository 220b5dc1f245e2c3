//! Per-(scenario, country) interpolation over the funding-fraction axis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use htm_core::{
    DataError, Datum, FundingFraction, IndicatorFrame, IndicatorName, Iso3, ModelResults,
    ScenarioDescriptor, YearRange,
};

/// What to do with requests outside the stored funding-fraction range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundsPolicy {
    /// Extrapolation fails.
    Strict,
    /// Values are clamped to the nearest stored endpoint and flagged.
    Clamp,
}

/// A resolved trajectory, flagged when the request had to be clamped.
#[derive(Clone, Debug, PartialEq)]
pub struct CountryFrame {
    pub frame: IndicatorFrame,
    pub clamped: bool,
}

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("funding fraction {0} is not a finite value in [0, 1]")]
    InvalidFraction(f64),
    #[error("funding fraction {requested} outside stored range [{min}, {max}]")]
    OutOfRange {
        requested: f64,
        min: f64,
        max: f64,
    },
    #[error(
        "{country} has {fractions} stored funding fraction(s) \
         (full-funding anchor present: {full_funding_present})"
    )]
    InsufficientPoints {
        country: Iso3,
        fractions: usize,
        full_funding_present: bool,
    },
    #[error("{country}: cannot convert dollars, total cost at full funding is zero")]
    CostZeroAtFull { country: Iso3 },
    #[error("dollar amount {requested} outside fundable range [{min}, {max}]")]
    DollarsOutOfRange {
        requested: f64,
        min: f64,
        max: f64,
    },
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Linear interpolator over the stored operating points of one
/// (scenario, country) block.
///
/// Construction requires at least two distinct fractions including the
/// full-funding anchor at 1.0; dollar conversion runs through the central
/// cost summed over the funding window.
pub struct Emulator<'a> {
    country: Iso3,
    block: &'a BTreeMap<FundingFraction, IndicatorFrame>,
    fractions: Vec<FundingFraction>,
    cost_by_fraction: Vec<f64>,
    bounds: BoundsPolicy,
}

impl<'a> Emulator<'a> {
    pub fn new(
        model: &'a ModelResults,
        scenario: &ScenarioDescriptor,
        country: &Iso3,
        years_for_funding: YearRange,
        bounds: BoundsPolicy,
    ) -> Result<Self, EmulatorError> {
        let block = model.country_block(scenario, country)?;
        let fractions: Vec<FundingFraction> = block.keys().copied().collect();
        let full_funding_present = fractions.contains(&FundingFraction::ONE);
        if fractions.len() < 2 || !full_funding_present {
            return Err(EmulatorError::InsufficientPoints {
                country: country.clone(),
                fractions: fractions.len(),
                full_funding_present,
            });
        }

        let cost = IndicatorName::cost();
        let mut cost_by_fraction = Vec::with_capacity(fractions.len());
        for frame in block.values() {
            cost_by_fraction.push(frame.total(&cost, &years_for_funding)?);
        }
        debug!(%scenario, %country, points = fractions.len(), "emulator ready");

        Ok(Self {
            country: country.clone(),
            block,
            fractions,
            cost_by_fraction,
            bounds,
        })
    }

    pub fn fractions(&self) -> &[FundingFraction] {
        &self.fractions
    }

    fn min_fraction(&self) -> FundingFraction {
        self.fractions[0]
    }

    fn max_fraction(&self) -> FundingFraction {
        self.fractions[self.fractions.len() - 1]
    }

    /// Resolves a request to an in-range fraction, clamping if permitted.
    fn resolve(&self, funding_fraction: f64) -> Result<(FundingFraction, bool), EmulatorError> {
        if !funding_fraction.is_finite() || !(0.0..=1.0).contains(&funding_fraction) {
            return Err(EmulatorError::InvalidFraction(funding_fraction));
        }
        let min = self.min_fraction().value();
        let max = self.max_fraction().value();
        if funding_fraction < min || funding_fraction > max {
            return match self.bounds {
                BoundsPolicy::Strict => Err(EmulatorError::OutOfRange {
                    requested: funding_fraction,
                    min,
                    max,
                }),
                BoundsPolicy::Clamp => {
                    let clamped = funding_fraction.clamp(min, max);
                    Ok((
                        FundingFraction::new(clamped)
                            .map_err(|_| EmulatorError::InvalidFraction(clamped))?,
                        true,
                    ))
                }
            };
        }
        Ok((
            FundingFraction::new(funding_fraction)
                .map_err(|_| EmulatorError::InvalidFraction(funding_fraction))?,
            false,
        ))
    }

    /// Indices of the two stored fractions bracketing a request, with the
    /// blend weight between them.
    fn bracket(&self, fraction: FundingFraction) -> (usize, usize, f64) {
        match self.fractions.binary_search(&fraction) {
            Ok(ix) => (ix, ix, 0.0),
            Err(ix) => {
                let lo = self.fractions[ix - 1];
                let hi = self.fractions[ix];
                let t = (fraction.value() - lo.value()) / (hi.value() - lo.value());
                (ix - 1, ix, t)
            }
        }
    }

    /// Trajectory at an arbitrary funding fraction.
    pub fn get(&self, funding_fraction: f64) -> Result<CountryFrame, EmulatorError> {
        let (fraction, clamped) = self.resolve(funding_fraction)?;
        let (ix_lo, ix_hi, t) = self.bracket(fraction);

        if ix_lo == ix_hi {
            let frame = self.block[&self.fractions[ix_lo]].clone();
            return Ok(CountryFrame { frame, clamped });
        }

        let hi = self.fractions[ix_hi];
        let lower = &self.block[&self.fractions[ix_lo]];
        let upper = &self.block[&hi];
        let mut frame = IndicatorFrame::new();
        for (indicator, series) in lower.iter() {
            let upper_series = upper.series(indicator)?;
            for (year, datum_lo) in series {
                let datum_hi = upper_series.get(year).copied().ok_or_else(|| {
                    DataError::NotFound(format!("{indicator}/{year} at {hi}"))
                })?;
                let datum = Datum {
                    low: lerp(datum_lo.low, datum_hi.low, t),
                    central: lerp(datum_lo.central, datum_hi.central, t),
                    high: lerp(datum_lo.high, datum_hi.high, t),
                };
                frame
                    .insert(indicator.clone(), *year, datum)
                    .map_err(EmulatorError::Data)?;
            }
        }
        Ok(CountryFrame { frame, clamped })
    }

    /// Central cost over the funding window at an arbitrary fraction.
    pub fn total_cost(&self, funding_fraction: f64) -> Result<f64, EmulatorError> {
        let (fraction, _) = self.resolve(funding_fraction)?;
        let (ix_lo, ix_hi, t) = self.bracket(fraction);
        Ok(lerp(
            self.cost_by_fraction[ix_lo],
            self.cost_by_fraction[ix_hi],
            t,
        ))
    }

    /// Central cost of the fully funded programme over the funding window.
    pub fn cost_at_full_funding(&self) -> f64 {
        self.cost_by_fraction[self.cost_by_fraction.len() - 1]
    }

    /// Dollars implied by a funding fraction; the linear inverse of
    /// `fraction_for_dollars`.
    pub fn dollars_for_fraction(&self, fraction: FundingFraction) -> f64 {
        fraction.value() * self.cost_at_full_funding()
    }

    /// Funding fraction implied by a dollar amount.
    pub fn fraction_for_dollars(&self, dollars: f64) -> Result<FundingFraction, EmulatorError> {
        if !dollars.is_finite() || dollars < 0.0 {
            return Err(EmulatorError::DollarsOutOfRange {
                requested: dollars,
                min: 0.0,
                max: self.cost_at_full_funding(),
            });
        }
        let full = self.cost_at_full_funding();
        if full == 0.0 {
            if dollars == 0.0 {
                return Ok(FundingFraction::ZERO);
            }
            return Err(EmulatorError::CostZeroAtFull {
                country: self.country.clone(),
            });
        }

        let min_cost = self.cost_by_fraction[0];
        let max_cost = self.cost_by_fraction[self.cost_by_fraction.len() - 1];
        if dollars < min_cost || dollars > max_cost {
            match self.bounds {
                BoundsPolicy::Strict => {
                    return Err(EmulatorError::DollarsOutOfRange {
                        requested: dollars,
                        min: min_cost,
                        max: max_cost,
                    })
                }
                BoundsPolicy::Clamp => {
                    let clamped = dollars.clamp(min_cost, max_cost);
                    return FundingFraction::new(clamped / full)
                        .map_err(|_| EmulatorError::InvalidFraction(clamped / full));
                }
            }
        }
        FundingFraction::new(dollars / full)
            .map_err(|_| EmulatorError::InvalidFraction(dollars / full))
    }

    /// Trajectory at the fraction implied by a dollar amount.
    pub fn get_dollars(&self, dollars: f64) -> Result<CountryFrame, EmulatorError> {
        let fraction = self.fraction_for_dollars(dollars)?;
        self.get(fraction.value())
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uga() -> Iso3 {
        Iso3::new("UGA").unwrap()
    }

    fn scenario() -> ScenarioDescriptor {
        ScenarioDescriptor::new("default")
    }

    fn window() -> YearRange {
        YearRange::new(2027, 2029).unwrap()
    }

    /// Three operating points; cost rises 0/50/100 over the window while
    /// cases fall 100/60/40 in every year.
    fn model() -> ModelResults {
        let mut model = ModelResults::new();
        for (ff, cost, cases) in [(0.0, 0.0, 100.0), (0.5, 50.0, 60.0), (1.0, 100.0, 40.0)] {
            let fraction = FundingFraction::new(ff).unwrap();
            for year in 2027..=2029 {
                model
                    .insert(
                        scenario(),
                        uga(),
                        fraction,
                        IndicatorName::cost(),
                        year,
                        Datum::single(cost / 3.0),
                    )
                    .unwrap();
                model
                    .insert(
                        scenario(),
                        uga(),
                        fraction,
                        IndicatorName::cases(),
                        year,
                        Datum::new(cases * 0.9, cases, cases * 1.1).unwrap(),
                    )
                    .unwrap();
            }
        }
        model
    }

    fn emulator(model: &ModelResults, bounds: BoundsPolicy) -> Emulator<'_> {
        Emulator::new(model, &scenario(), &uga(), window(), bounds).unwrap()
    }

    #[test]
    fn stored_fraction_returns_stored_frame() {
        let model = model();
        let em = emulator(&model, BoundsPolicy::Strict);
        let got = em.get(0.5).unwrap();
        assert!(!got.clamped);
        assert_eq!(
            got.frame.get(&IndicatorName::cases(), 2028).unwrap().central,
            60.0
        );
    }

    #[test]
    fn interpolation_is_linear_between_neighbours() {
        let model = model();
        let em = emulator(&model, BoundsPolicy::Strict);
        for (ff, expected) in [(0.25, 80.0), (0.75, 50.0), (0.9, 44.0)] {
            let got = em.get(ff).unwrap();
            let cases = got.frame.get(&IndicatorName::cases(), 2027).unwrap();
            assert!((cases.central - expected).abs() < 1e-9, "ff {ff}");
            assert!((cases.low - expected * 0.9).abs() < 1e-9);
            assert!((cases.high - expected * 1.1).abs() < 1e-9);
        }
    }

    #[test]
    fn nonsense_fractions_are_rejected() {
        let model = model();
        let em = emulator(&model, BoundsPolicy::Strict);
        assert!(matches!(
            em.get(f64::NAN),
            Err(EmulatorError::InvalidFraction(_))
        ));
        assert!(matches!(
            em.get(-0.1),
            Err(EmulatorError::InvalidFraction(_))
        ));
        assert!(matches!(em.get(1.1), Err(EmulatorError::InvalidFraction(_))));
    }

    #[test]
    fn strict_mode_refuses_extrapolation() {
        let mut model = ModelResults::new();
        for (ff, cases) in [(0.4, 80.0), (1.0, 40.0)] {
            let fraction = FundingFraction::new(ff).unwrap();
            for year in 2027..=2029 {
                model
                    .insert(
                        scenario(),
                        uga(),
                        fraction,
                        IndicatorName::cost(),
                        year,
                        Datum::single(10.0 * ff),
                    )
                    .unwrap();
                model
                    .insert(
                        scenario(),
                        uga(),
                        fraction,
                        IndicatorName::cases(),
                        year,
                        Datum::single(cases),
                    )
                    .unwrap();
            }
        }
        let em = emulator(&model, BoundsPolicy::Strict);
        assert!(matches!(
            em.get(0.2),
            Err(EmulatorError::OutOfRange { .. })
        ));

        let tolerant = emulator(&model, BoundsPolicy::Clamp);
        let got = tolerant.get(0.2).unwrap();
        assert!(got.clamped);
        assert_eq!(
            got.frame.get(&IndicatorName::cases(), 2027).unwrap().central,
            80.0
        );
    }

    #[test]
    fn requires_two_points_and_full_funding_anchor() {
        let mut one_point = ModelResults::new();
        one_point
            .insert(
                scenario(),
                uga(),
                FundingFraction::ONE,
                IndicatorName::cost(),
                2027,
                Datum::single(1.0),
            )
            .unwrap();
        assert!(matches!(
            Emulator::new(&one_point, &scenario(), &uga(), window(), BoundsPolicy::Strict),
            Err(EmulatorError::InsufficientPoints {
                full_funding_present: true,
                ..
            })
        ));

        let mut no_anchor = ModelResults::new();
        for ff in [0.0, 0.5] {
            no_anchor
                .insert(
                    scenario(),
                    uga(),
                    FundingFraction::new(ff).unwrap(),
                    IndicatorName::cost(),
                    2027,
                    Datum::single(1.0),
                )
                .unwrap();
        }
        assert!(matches!(
            Emulator::new(&no_anchor, &scenario(), &uga(), window(), BoundsPolicy::Strict),
            Err(EmulatorError::InsufficientPoints {
                full_funding_present: false,
                ..
            })
        ));
    }

    #[test]
    fn dollars_and_fractions_round_trip() {
        let model = model();
        let em = emulator(&model, BoundsPolicy::Strict);
        assert_eq!(em.cost_at_full_funding(), 100.0);

        for ff in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let fraction = FundingFraction::new(ff).unwrap();
            let dollars = em.dollars_for_fraction(fraction);
            let back = em.fraction_for_dollars(dollars).unwrap();
            assert!((back.value() - ff).abs() < 1e-9);
        }

        // A dollar request resolves to the same frame as its fraction.
        let by_dollars = em.get_dollars(50.0).unwrap();
        let by_fraction = em.get(0.5).unwrap();
        assert_eq!(by_dollars, by_fraction);
    }

    #[test]
    fn dollars_outside_envelope_fail_in_strict_mode() {
        let model = model();
        let em = emulator(&model, BoundsPolicy::Strict);
        assert!(matches!(
            em.fraction_for_dollars(150.0),
            Err(EmulatorError::DollarsOutOfRange { .. })
        ));
        assert!(matches!(
            em.fraction_for_dollars(-1.0),
            Err(EmulatorError::DollarsOutOfRange { .. })
        ));
    }

    #[test]
    fn zero_cost_programme_cannot_convert_dollars() {
        let mut model = ModelResults::new();
        for ff in [0.0, 1.0] {
            let fraction = FundingFraction::new(ff).unwrap();
            for year in 2027..=2029 {
                model
                    .insert(
                        scenario(),
                        uga(),
                        fraction,
                        IndicatorName::cost(),
                        year,
                        Datum::ZERO,
                    )
                    .unwrap();
            }
        }
        let em = emulator(&model, BoundsPolicy::Strict);
        assert!(matches!(
            em.fraction_for_dollars(10.0),
            Err(EmulatorError::CostZeroAtFull { .. })
        ));
        assert_eq!(em.fraction_for_dollars(0.0).unwrap(), FundingFraction::ZERO);
    }
}
