#![deny(warnings)]

//! Headless CLI: load normalised inputs, run the allocation analysis for one
//! disease and scenario, and export the portfolio trajectories.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use data_pipeline::{
    build_annual_data, build_fixed_gp, build_funding, build_model_results, parameters_from_yaml,
    rows_from_json_lines, AnnualDataRow, Environment, FundingRow, GpRow, ModelResultRow,
};
use htm_core::{Database, Gp, Parameters, ScenarioDescriptor};
use htm_runtime::{Analysis, PortfolioProjection};
use htm_solver::SolverOptions;
use persistence::{load_session, save_session, write_trajectories_parquet, Session, TrajectoryRow};

struct Args {
    params: PathBuf,
    data: PathBuf,
    sessions: PathBuf,
    output: PathBuf,
    disease: String,
    scenario: String,
    approach: String,
    refresh: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        params: PathBuf::from("parameters.yml"),
        data: PathBuf::from("data"),
        sessions: PathBuf::from("sessions"),
        output: PathBuf::from("outputs"),
        disease: "hiv".to_string(),
        scenario: "IC_IC".to_string(),
        approach: "b".to_string(),
        refresh: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--params" => args.params = it.next().map(PathBuf::from).unwrap_or(args.params),
            "--data" => args.data = it.next().map(PathBuf::from).unwrap_or(args.data),
            "--sessions" => args.sessions = it.next().map(PathBuf::from).unwrap_or(args.sessions),
            "--output" => args.output = it.next().map(PathBuf::from).unwrap_or(args.output),
            "--disease" => args.disease = it.next().unwrap_or(args.disease),
            "--scenario" => args.scenario = it.next().unwrap_or(args.scenario),
            "--approach" => args.approach = it.next().unwrap_or(args.approach),
            "--refresh" => args.refresh = true,
            _ => {}
        }
    }
    args
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    rows_from_json_lines(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Assembles the database from raw tables, or restores the session snapshot
/// taken on a previous run.
fn load_database(
    env: &Environment,
    disease: &str,
    parameters: &Parameters,
    refresh: bool,
) -> Result<Database> {
    let session_path = env.session_dir.join(format!("{disease}_model_data.bin"));
    if !parameters.load_data_from_raw_files && !refresh && session_path.exists() {
        info!(path = %session_path.display(), "restoring session snapshot");
        return Ok(load_session(&session_path)?.database);
    }

    let base = env.data_dir.join(disease);
    let model_rows: Vec<ModelResultRow> = read_rows(&base.join("model_results.jsonl"))?;
    let partner_rows: Vec<AnnualDataRow> = read_rows(&base.join("partner_data.jsonl"))?;
    let pf_rows: Vec<AnnualDataRow> = read_rows(&base.join("pf_input_data.jsonl"))?;
    let gp_path = base.join("gp.jsonl");
    let gp = if gp_path.exists() {
        let gp_rows: Vec<GpRow> = read_rows(&gp_path)?;
        build_fixed_gp(&gp_rows)?
    } else {
        Gp::new()
    };

    let database = Database::new(
        build_model_results(&model_rows)?,
        build_annual_data(&partner_rows)?,
        build_annual_data(&pf_rows)?,
        gp,
    );
    save_session(&session_path, &Session::new(disease, database.clone()))?;
    Ok(database)
}

fn export_rows(projection: &PortfolioProjection) -> Vec<TrajectoryRow> {
    let mut rows = Vec::new();
    for (country, country_projection) in &projection.country_projections {
        for (indicator, series) in country_projection.model_projection_adj.iter() {
            for (year, datum) in series {
                rows.push(TrajectoryRow {
                    country: country.to_string(),
                    indicator: indicator.to_string(),
                    year: *year,
                    low: datum.low,
                    central: datum.central,
                    high: datum.high,
                });
            }
        }
    }
    for (indicator, series) in &projection.portfolio {
        for (year, datum) in series {
            rows.push(TrajectoryRow {
                country: "ALL".to_string(),
                indicator: indicator.to_string(),
                year: *year,
                low: datum.low,
                central: datum.central,
                high: datum.high,
            });
        }
    }
    rows
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    info!(disease = %args.disease, scenario = %args.scenario, approach = %args.approach, "starting analysis");

    let parameters = parameters_from_yaml(
        &std::fs::read_to_string(&args.params)
            .with_context(|| format!("reading {}", args.params.display()))?,
    )?;
    let env = Environment::new(&args.data, &args.sessions, &args.output);

    let database = load_database(&env, &args.disease, &parameters, args.refresh)?;

    let funding_base = env.data_dir.join(&args.disease);
    let tgf_rows: Vec<FundingRow> = read_rows(&funding_base.join("tgf_funding.jsonl"))?;
    let non_tgf_rows: Vec<FundingRow> = read_rows(&funding_base.join("non_tgf_funding.jsonl"))?;
    let window = parameters.years_for_funding;
    let tgf_funding = build_funding(&tgf_rows, window)?;
    let non_tgf_funding = build_funding(&non_tgf_rows, window)?;
    let tgf_total = tgf_funding.total();

    let analysis = Analysis::new(
        database,
        tgf_funding,
        non_tgf_funding,
        parameters,
        ScenarioDescriptor::new(args.scenario.clone()),
    )?;

    let projection = match args.approach.as_str() {
        "a" => analysis.portfolio_projection_approach_a()?,
        _ => analysis.portfolio_projection_approach_b(&SolverOptions::default())?,
    };

    let n_countries = projection.country_projections.len();
    let tgf_spent: f64 = projection.tgf_funding_by_country.values().sum();
    println!(
        "Inputs OK | countries: {} | scenario: {} | approach: {}",
        n_countries, projection.scenario_descriptor, args.approach
    );
    println!(
        "KPI | tgf budget: ${:.0} | tgf allocated: ${:.0} | objective: {:.4} | warnings: {}",
        tgf_total,
        tgf_spent,
        projection
            .solver
            .as_ref()
            .map(|s| s.best().objective)
            .unwrap_or(f64::NAN),
        projection.diagnostics.len()
    );
    for diagnostic in &projection.diagnostics {
        println!("warning | {diagnostic}");
    }

    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let out_path = env
        .output_dir
        .join(format!("trajectories_{}_{}.parquet", args.disease, ts));
    let rows = export_rows(&projection);
    if let Err(e) = write_trajectories_parquet(&out_path, &rows) {
        eprintln!("failed to write trajectories: {e}");
    } else {
        println!("Trajectories written: {}", out_path.display());
    }

    Ok(())
}
