use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::DataPersistError;
use crate::types::{DateRange, PricePoint};

/// Trading days per year, used for the years-of-data statistic
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Result of merging a batch into the persisted window
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub window: Vec<PricePoint>,
    pub rows_received: usize,
    pub rows_removed: usize,
}

impl IngestReport {
    pub fn date_range(&self) -> Option<DateRange> {
        DateRange::of(&self.window)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub row_count: usize,
    pub date_range: Option<DateRange>,
    pub at_capacity: bool,
    pub window_size: usize,
    pub years_of_data: f64,
}

/// Owns the on-disk price history: a date-keyed window of at most
/// `capacity` rows, rewritten in full on every ingest.
pub struct RollingWindowStore {
    path: PathBuf,
    capacity: usize,
}

impl RollingWindowStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted window. A missing file is an empty window.
    pub fn load(&self) -> Result<Vec<PricePoint>, DataPersistError> {
        if !self.path.exists() {
            debug!("Dataset {} not found, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let read_err = |source| DataPersistError::Read { path: self.path.clone(), source };
        let mut reader = csv::Reader::from_path(&self.path).map_err(read_err)?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row.map_err(read_err)?);
        }
        Ok(rows)
    }

    /// Merge `new_rows` into the window. On a date collision the incoming row
    /// replaces the stored one. The merged window is sorted, trimmed to
    /// capacity and written back; if the write fails the stored window is
    /// left as it was.
    pub fn ingest(&self, new_rows: Vec<PricePoint>) -> Result<IngestReport, DataPersistError> {
        let existing = self.load()?;
        let rows_received = new_rows.len();

        let merged = merge_rows(existing, new_rows);
        info!("Merged data: {} total rows", merged.len());

        let (window, rows_removed) = trim_to_capacity(merged, self.capacity);
        if rows_removed > 0 {
            info!("Applied rolling window: removed {} old rows", rows_removed);
        }
        if let Some(range) = DateRange::of(&window) {
            info!("Current data window: {}", range);
        }

        self.save(&window)?;

        Ok(IngestReport {
            window,
            rows_received,
            rows_removed,
        })
    }

    pub fn stats(&self) -> Result<WindowStats, DataPersistError> {
        let rows = self.load()?;
        Ok(WindowStats {
            row_count: rows.len(),
            date_range: DateRange::of(&rows),
            at_capacity: rows.len() >= self.capacity,
            window_size: self.capacity,
            years_of_data: rows.len() as f64 / TRADING_DAYS_PER_YEAR,
        })
    }

    /// Write to a sibling temp file, then rename over the dataset
    fn save(&self, rows: &[PricePoint]) -> Result<(), DataPersistError> {
        let mut writer = csv::Writer::from_writer(vec![]);
        for row in rows {
            writer.serialize(row)?;
        }
        let bytes = writer.into_inner().map_err(|e| DataPersistError::Write {
            path: self.path.clone(),
            source: e.into_error(),
        })?;

        let write_err = |source| DataPersistError::Write { path: self.path.clone(), source };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let tmp = self.temp_path();
        if let Err(e) = fs::write(&tmp, &bytes).and_then(|_| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }

        info!("Saved {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Date-keyed union of both batches; later rows overwrite earlier ones
pub fn merge_rows(existing: Vec<PricePoint>, new_rows: Vec<PricePoint>) -> Vec<PricePoint> {
    let mut by_date: BTreeMap<NaiveDate, PricePoint> = BTreeMap::new();
    for row in existing.into_iter().chain(new_rows) {
        by_date.insert(row.date, row);
    }
    by_date.into_values().collect()
}

/// Keep the most recent `capacity` rows of an ascending window
pub fn trim_to_capacity(mut rows: Vec<PricePoint>, capacity: usize) -> (Vec<PricePoint>, usize) {
    let removed = rows.len().saturating_sub(capacity);
    if removed > 0 {
        rows.drain(..removed);
    }
    (rows, removed)
}
