//! Cost-effectiveness frontier for a minimised objective.
//!
//! Points are (cost, objective) pairs; the frontier is the lower-left edge
//! of their convex hull, trimmed so that spending more never buys a worse
//! objective. Applying the filter twice yields the same point set.

use serde::{Deserialize, Serialize};

use htm_core::FundingFraction;

/// One operating point on a country's cost-impact curve.
///
/// `cost` is the funding-window total at this fraction; `objective` is the
/// solver's (to-be-minimised) score for the trajectory at this fraction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub funding_fraction: FundingFraction,
    pub cost: f64,
    pub objective: f64,
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Indices of the non-dominated points, sorted by ascending cost.
///
/// Equal-cost ties keep the lowest objective; collinear points along the
/// hull edge are retained.
pub fn frontier_indices(points: &[(f64, f64)]) -> Vec<usize> {
    if points.len() <= 1 {
        return (0..points.len()).collect();
    }

    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&i, &j| {
        points[i]
            .0
            .total_cmp(&points[j].0)
            .then(points[i].1.total_cmp(&points[j].1))
            .then(i.cmp(&j))
    });

    // For equal cost only the lowest objective can be on the frontier.
    let mut candidates: Vec<usize> = Vec::with_capacity(order.len());
    for ix in order {
        match candidates.last() {
            Some(&prev) if points[prev].0 == points[ix].0 => {}
            _ => candidates.push(ix),
        }
    }

    // Lower convex hull, left to right.
    let mut hull: Vec<usize> = Vec::with_capacity(candidates.len());
    for ix in candidates {
        while hull.len() >= 2
            && cross(
                points[hull[hull.len() - 2]],
                points[hull[hull.len() - 1]],
                points[ix],
            ) < 0.0
        {
            hull.pop();
        }
        hull.push(ix);
    }

    // The hull closes back up towards the max-cost point; drop the rising
    // tail so the objective is strictly decreasing along the frontier.
    let mut kept: Vec<usize> = Vec::with_capacity(hull.len());
    let mut best = f64::INFINITY;
    for ix in hull {
        if points[ix].1 < best {
            best = points[ix].1;
            kept.push(ix);
        }
    }
    kept
}

/// Applies the frontier filter to a country's curve.
///
/// The lowest-fraction point (the zero-funding row) is always retained,
/// even when another point matches its cost with a better objective.
pub fn filter_dominated(points: &[CurvePoint]) -> Vec<CurvePoint> {
    if points.is_empty() {
        return Vec::new();
    }
    let pairs: Vec<(f64, f64)> = points.iter().map(|p| (p.cost, p.objective)).collect();
    let mut keep = frontier_indices(&pairs);

    let anchor = points
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| p.funding_fraction)
        .map(|(ix, _)| ix)
        .unwrap_or(0);
    if !keep.contains(&anchor) {
        keep.push(anchor);
    }

    let mut kept: Vec<CurvePoint> = keep.into_iter().map(|ix| points[ix]).collect();
    kept.sort_by(|a, b| a.funding_fraction.cmp(&b.funding_fraction));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn point(ff: f64, cost: f64, objective: f64) -> CurvePoint {
        CurvePoint {
            funding_fraction: FundingFraction::new(ff).unwrap(),
            cost,
            objective,
        }
    }

    #[test]
    fn drops_the_dominated_point() {
        let pts = [
            (0.0, 100.0),
            (30.0, 80.0),
            (50.0, 82.0),
            (60.0, 60.0),
            (100.0, 40.0),
        ];
        let keep = frontier_indices(&pts);
        assert_eq!(keep, vec![0, 1, 3, 4]);
    }

    #[test]
    fn equal_cost_keeps_lowest_objective() {
        let pts = [(0.0, 100.0), (50.0, 70.0), (50.0, 60.0), (100.0, 40.0)];
        let keep = frontier_indices(&pts);
        assert!(keep.contains(&2));
        assert!(!keep.contains(&1));
    }

    #[test]
    fn rising_tail_is_dominated() {
        let pts = [(0.0, 100.0), (40.0, 50.0), (80.0, 70.0)];
        let keep = frontier_indices(&pts);
        assert_eq!(keep, vec![0, 1]);
    }

    #[test]
    fn zero_funding_point_is_always_retained() {
        let curve = vec![point(0.0, 0.0, 100.0), point(0.2, 0.0, 90.0), point(1.0, 50.0, 40.0)];
        let kept = filter_dominated(&curve);
        assert_eq!(kept[0].funding_fraction, FundingFraction::ZERO);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn filter_is_idempotent() {
        let curve = vec![
            point(0.0, 0.0, 100.0),
            point(0.3, 30.0, 80.0),
            point(0.5, 50.0, 82.0),
            point(0.6, 60.0, 60.0),
            point(1.0, 100.0, 40.0),
        ];
        let once = filter_dominated(&curve);
        let twice = filter_dominated(&once);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 4);
    }

    #[test]
    fn random_clouds_yield_convex_decreasing_frontiers() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..10 {
            let pts: Vec<(f64, f64)> = (0..15)
                .map(|_| (rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)))
                .collect();
            let keep = frontier_indices(&pts);
            assert!(!keep.is_empty());

            // First kept point is the cheapest; last reaches the best objective.
            let min_cost = pts.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
            let min_obj = pts.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
            assert_eq!(pts[keep[0]].0, min_cost);
            assert_eq!(pts[*keep.last().unwrap()].1, min_obj);

            // Objective strictly decreasing, and marginal gain per dollar
            // shrinking, along ascending cost.
            let mut last_gradient = f64::INFINITY;
            for pair in keep.windows(2) {
                let (c0, o0) = pts[pair[0]];
                let (c1, o1) = pts[pair[1]];
                assert!(c1 > c0);
                assert!(o1 < o0);
                let gradient = (o0 - o1) / (c1 - c0);
                assert!(gradient <= last_gradient + 1e-12);
                last_gradient = gradient;
            }
        }
    }
}
