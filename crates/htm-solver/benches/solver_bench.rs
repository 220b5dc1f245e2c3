use criterion::{black_box, criterion_group, criterion_main, Criterion};
use htm_core::{FundingFraction, Iso3};
use htm_curves::CurvePoint;
use htm_solver::{solve, CountryCurve, SolverOptions};

fn build_curves(n_countries: usize, n_points: usize) -> Vec<CountryCurve> {
    (0..n_countries)
        .map(|c| {
            let code = format!(
                "{}{}{}",
                (b'A' + (c / 676) as u8 % 26) as char,
                (b'A' + (c / 26) as u8 % 26) as char,
                (b'A' + (c % 26) as u8) as char
            );
            let full_cost = 50.0 + 10.0 * c as f64;
            let burden = 500.0 + 20.0 * c as f64;
            let points = (0..n_points)
                .map(|i| {
                    let ff = i as f64 / (n_points - 1) as f64;
                    CurvePoint {
                        funding_fraction: FundingFraction::new(ff).unwrap(),
                        cost: full_cost * ff,
                        objective: burden * (1.0 - 0.6 * ff),
                    }
                })
                .collect();
            CountryCurve {
                country: Iso3::new(code).unwrap(),
                points,
                non_tgf: full_cost * 0.1,
            }
        })
        .collect()
}

fn bench_solve(c: &mut Criterion) {
    let curves = build_curves(100, 11);
    let budget: f64 = curves.iter().map(|cv| cv.points.last().unwrap().cost).sum::<f64>() * 0.4;
    let options = SolverOptions::default();
    c.bench_function("solve 100 countries x 11 points", |b| {
        b.iter(|| {
            let report = solve(black_box(&curves), black_box(budget), &options).unwrap();
            black_box(report.best().objective)
        })
    });
}

criterion_group!(benches, bench_solve);
criterion_main!(benches);
