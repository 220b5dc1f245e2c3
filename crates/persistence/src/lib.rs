#![deny(warnings)]

//! Persistence layer: session snapshots and trajectory export.
//!
//! A session is a bincode snapshot of a fully loaded `Database`, written
//! once after the raw tables are assembled and read back on subsequent runs
//! to skip the expensive load. Trajectory exports are row-oriented parquet
//! for downstream analysis tooling.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parquet::basic::{ConvertedType, Repetition, Type as PhysicalType};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use htm_core::Database;

/// Describes when and for which disease a snapshot was taken.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMeta {
    pub disease: String,
    pub created_at: DateTime<Utc>,
}

/// A loaded database plus its snapshot metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub meta: SessionMeta,
    pub database: Database,
}

impl Session {
    pub fn new(disease: impl Into<String>, database: Database) -> Self {
        Self {
            meta: SessionMeta {
                disease: disease.into(),
                created_at: Utc::now(),
            },
            database,
        }
    }
}

/// Serializes a session with bincode and writes it to disk.
pub fn save_session<P: AsRef<Path>>(path: P, session: &Session) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = bincode::serialize(session)?;
    std::fs::write(&path, bytes)?;
    info!(path = %path.as_ref().display(), disease = %session.meta.disease, "session saved");
    Ok(())
}

/// Reads a session snapshot back from disk.
pub fn load_session<P: AsRef<Path>>(path: P) -> Result<Session> {
    let bytes = std::fs::read(&path)?;
    let session = bincode::deserialize(&bytes)?;
    Ok(session)
}

/// Row format for trajectory exports.
#[derive(Clone, Debug)]
pub struct TrajectoryRow {
    pub country: String,
    pub indicator: String,
    pub year: i32,
    pub low: f64,
    pub central: f64,
    pub high: f64,
}

/// Writes trajectory rows to a parquet file at the given path.
pub fn write_trajectories_parquet<P: AsRef<Path>>(path: P, rows: &[TrajectoryRow]) -> Result<()> {
    let fields = vec![
        Type::primitive_type_builder("country", PhysicalType::BYTE_ARRAY)
            .with_repetition(Repetition::REQUIRED)
            .with_converted_type(ConvertedType::UTF8)
            .build()?,
        Type::primitive_type_builder("indicator", PhysicalType::BYTE_ARRAY)
            .with_repetition(Repetition::REQUIRED)
            .with_converted_type(ConvertedType::UTF8)
            .build()?,
        Type::primitive_type_builder("year", PhysicalType::INT32)
            .with_repetition(Repetition::REQUIRED)
            .build()?,
        Type::primitive_type_builder("low", PhysicalType::DOUBLE)
            .with_repetition(Repetition::REQUIRED)
            .build()?,
        Type::primitive_type_builder("central", PhysicalType::DOUBLE)
            .with_repetition(Repetition::REQUIRED)
            .build()?,
        Type::primitive_type_builder("high", PhysicalType::DOUBLE)
            .with_repetition(Repetition::REQUIRED)
            .build()?,
    ];
    let fields_ptrs: Vec<Arc<Type>> = fields.into_iter().map(Arc::new).collect();
    let schema = Type::group_type_builder("trajectories")
        .with_fields(fields_ptrs)
        .build()?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let props = WriterProperties::builder().build();
    let mut writer =
        SerializedFileWriter::new(file, Arc::new(schema), Arc::new(props))?;

    let countries: Vec<ByteArray> = rows
        .iter()
        .map(|r| ByteArray::from(r.country.as_str()))
        .collect();
    let indicators: Vec<ByteArray> = rows
        .iter()
        .map(|r| ByteArray::from(r.indicator.as_str()))
        .collect();
    let years: Vec<i32> = rows.iter().map(|r| r.year).collect();
    let lows: Vec<f64> = rows.iter().map(|r| r.low).collect();
    let centrals: Vec<f64> = rows.iter().map(|r| r.central).collect();
    let highs: Vec<f64> = rows.iter().map(|r| r.high).collect();

    let mut row_group = writer.next_row_group()?;
    for (name, batch) in [("country", &countries), ("indicator", &indicators)] {
        let mut col = row_group
            .next_column()?
            .ok_or_else(|| anyhow!("no column"))?;
        match col.untyped() {
            ColumnWriter::ByteArrayColumnWriter(w) => {
                let _ = w.write_batch(batch, None, None)?;
            }
            _ => return Err(anyhow!("unexpected column type for {name}")),
        }
        col.close()?;
    }
    {
        let mut col = row_group
            .next_column()?
            .ok_or_else(|| anyhow!("no column"))?;
        match col.untyped() {
            ColumnWriter::Int32ColumnWriter(w) => {
                let _ = w.write_batch(&years, None, None)?;
            }
            _ => return Err(anyhow!("unexpected column type for year")),
        }
        col.close()?;
    }
    for (name, batch) in [("low", &lows), ("central", &centrals), ("high", &highs)] {
        let mut col = row_group
            .next_column()?
            .ok_or_else(|| anyhow!("no column"))?;
        match col.untyped() {
            ColumnWriter::DoubleColumnWriter(w) => {
                let _ = w.write_batch(batch, None, None)?;
            }
            _ => return Err(anyhow!("unexpected column type for {name}")),
        }
        col.close()?;
    }
    row_group.close()?;
    writer.close()?;
    info!(rows = rows.len(), "parquet written");
    Ok(())
}
