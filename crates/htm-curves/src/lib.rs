#![deny(warnings)]

//! Cost-impact curve machinery: the per-country emulator that interpolates
//! model output across the funding-fraction axis, and the
//! cost-effectiveness frontier filter that removes dominated operating
//! points before optimisation.

mod emulator;
mod frontier;

pub use emulator::{BoundsPolicy, CountryFrame, Emulator, EmulatorError};
pub use frontier::{filter_dominated, frontier_indices, CurvePoint};
