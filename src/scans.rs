// 🕒 Scans Table - Per-session list of converted files and acquisition times
// Tab-separated `filename` / `acq_time` rows, one file per subject/session

use crate::datasource::DataSource;
use crate::error::Result;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Date used when a source reports a time but no date
pub const UNKNOWN_DATE: (i32, u32, u32) = (1925, 1, 1);

const NOT_AVAILABLE: &str = "n/a";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScanRow {
    filename: String,
    acq_time: String,
}

// ============================================================================
// SCANS TABLE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScansTable {
    path: PathBuf,
    rows: BTreeMap<String, String>,
}

impl ScansTable {
    /// Location of the table in a subject or session folder
    pub fn path_for(dir: &Path, subject: &str, session: &str) -> PathBuf {
        let name = if session.is_empty() {
            format!("{}_scans.tsv", subject)
        } else {
            format!("{}_{}_scans.tsv", subject, session)
        };
        dir.join(name)
    }

    /// Read an existing table, or start an empty one
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut rows = BTreeMap::new();

        if path.is_file() {
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(b'\t')
                .has_headers(true)
                .from_path(&path)?;
            for result in reader.deserialize() {
                let row: ScanRow = result?;
                rows.insert(row.filename, row.acq_time);
            }
            debug!("Read {} rows from {}", rows.len(), path.display());
        }

        Ok(ScansTable { path, rows })
    }

    /// Add or replace the row of a file (relative to the session folder)
    pub fn record(&mut self, filename: impl Into<String>, acq_time: Option<NaiveDateTime>) {
        let acq_time = acq_time
            .map(|time| time.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        self.rows.insert(filename.into(), acq_time);
    }

    pub fn acq_time(&self, filename: &str) -> Option<&str> {
        self.rows.get(filename).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the table, sorted by filename
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(File::create(&self.path)?);
        for (filename, acq_time) in &self.rows {
            writer.serialize(ScanRow {
                filename: filename.clone(),
                acq_time: acq_time.clone(),
            })?;
        }
        writer.flush()?;
        info!("Wrote {} rows to {}", self.rows.len(), self.path.display());
        Ok(())
    }
}

// ============================================================================
// ACQUISITION TIME
// ============================================================================

/// Acquisition time of a source item.
///
/// Uses `AcquisitionDateTime` when present, otherwise `AcquisitionDate` and
/// `AcquisitionTime`. A time without a date gets [`UNKNOWN_DATE`].
pub fn acquisition_time<S: DataSource + ?Sized>(source: &S) -> Option<NaiveDateTime> {
    let datetime = source.attribute("AcquisitionDateTime");
    if let Some(parsed) = parse_datetime(&datetime) {
        return Some(parsed);
    }

    let time = parse_time(&source.attribute("AcquisitionTime"))?;
    let date = parse_date(&source.attribute("AcquisitionDate")).or_else(|| {
        let (year, month, day) = UNKNOWN_DATE;
        NaiveDate::from_ymd_opt(year, month, day)
    })?;
    Some(date.and_time(time))
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    ["%Y%m%d%H%M%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    ["%Y%m%d", "%Y-%m-%d", "%Y.%m.%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    ["%H%M%S%.f", "%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
}

// ============================================================================
// TESTS
// ============================================================================
