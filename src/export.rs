//! Record export: CSV files and the count-suffixed file name.
//!
//! The CSV has one row per record in identifier order:
//!
//! ```text
//! identifier,score,valid
//! 1,90,true
//! 2,,false
//! ```
//!
//! A missing score is an empty field.

use crate::error::ExtractError;
use crate::record::{Record, RecordSet};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
struct CsvRow {
    identifier: i64,
    score: Option<i64>,
    valid: bool,
}

impl From<&Record> for CsvRow {
    fn from(r: &Record) -> Self {
        Self {
            identifier: r.identifier,
            score: r.score,
            valid: r.is_valid(),
        }
    }
}

/// Serialize `records` as CSV into `writer`.
pub fn write_csv<W: Write>(records: &RecordSet, writer: W) -> Result<(), csv::Error> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in records {
        csv.serialize(CsvRow::from(record))?;
    }
    // An empty set still gets its header.
    if records.is_empty() {
        csv.write_record(["identifier", "score", "valid"])?;
    }
    csv.flush()?;
    Ok(())
}

/// Write `records` to `path` as CSV.
///
/// The file is written next to its destination and renamed into place, so a
/// reader never sees a half-written file.
pub fn export_csv(records: &RecordSet, path: &Path) -> Result<(), ExtractError> {
    let io_err = |source: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    write_csv(records, &mut tmp).map_err(|e| io_err(e.into()))?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    info!("Exported {} records to {}", records.len(), path.display());
    Ok(())
}

/// `results.csv` → `results_(7 of 9).csv`.
pub fn counted_file_name(path: &Path, valid: usize, total: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_({valid} of {total}).{}", ext.to_string_lossy()),
        None => format!("{stem}_({valid} of {total})"),
    };
    path.with_file_name(name)
}
