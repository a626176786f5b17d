//! Delimited-table I/O with schema checks up front.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("IO error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} is missing required columns: {}", missing.join(", "))]
    MissingColumns { path: PathBuf, missing: Vec<String> },
}

pub type Result<T> = std::result::Result<T, TableError>;

fn csv_err(path: &Path) -> impl Fn(csv::Error) -> TableError + '_ {
    move |source| TableError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Read every row of `path` as `T`, after checking that each of `required`
/// is present in the (whitespace-trimmed) header row.
pub fn read_rows<T: DeserializeOwned>(path: &Path, required: &[&str]) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .from_path(path)
        .map_err(csv_err(path))?;

    let headers: csv::StringRecord = reader
        .headers()
        .map_err(csv_err(path))?
        .iter()
        .map(str::trim)
        .collect();

    let missing = missing_columns(&headers, required);
    if !missing.is_empty() {
        return Err(TableError::MissingColumns {
            path: path.to_path_buf(),
            missing,
        });
    }
    reader.set_headers(headers.clone());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err(path))?;
        rows.push(record.deserialize(Some(&headers)).map_err(csv_err(path))?);
    }
    log::info!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Columns of `required` absent from `headers`, in `required` order.
pub fn missing_columns(headers: &csv::StringRecord, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect()
}

/// Integer id cell. Nullable integer columns come back from tabular exports
/// as floats ("80012345.0"), so integral floats count; blanks and junk are `None`.
pub fn parse_id(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    if let Ok(id) = cell.parse::<i64>() {
        return Some(id);
    }
    let value: f64 = cell.parse().ok()?;
    if value.is_finite() && value.fract() == 0.0 {
        Some(value as i64)
    } else {
        None
    }
}

/// `deserialize_with` helper for id columns: an unreadable id is `None`,
/// never a failed read of the whole table.
pub fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let cell: Option<String> = Option::deserialize(deserializer)?;
    Ok(cell.as_deref().and_then(parse_id))
}

/// Write serializable rows; the header comes from the row type's field names.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = open_writer(path)?;
    for row in rows {
        writer.serialize(row).map_err(csv_err(path))?;
    }
    finish(path, writer, rows.len())
}

/// Write pre-rendered records under an explicit header.
pub fn write_records(path: &Path, header: &[String], records: &[Vec<String>]) -> Result<()> {
    let mut writer = open_writer(path)?;
    writer.write_record(header).map_err(csv_err(path))?;
    for record in records {
        writer.write_record(record).map_err(csv_err(path))?;
    }
    finish(path, writer, records.len())
}

/// `<dir>/<stem>.csv`, creating `dir` if needed.
pub fn output_path(dir: &Path, stem: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|source| TableError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(dir.join(format!("{stem}.csv")))
}

fn open_writer(path: &Path) -> Result<csv::Writer<File>> {
    csv::Writer::from_path(path).map_err(csv_err(path))
}

fn finish(path: &Path, mut writer: csv::Writer<File>, rows: usize) -> Result<()> {
    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Wrote {} rows to {}", rows, path.display());
    Ok(())
}
