use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::EventStoreError;

/// Append-only record log. Records are never rewritten or removed.
pub trait EventStore<T>: Send + Sync {
    fn append(&self, record: &T) -> Result<(), EventStoreError>;

    fn read_all(&self) -> Result<Vec<T>, EventStoreError>;

    fn read_last(&self) -> Result<Option<T>, EventStoreError>;

    /// Most recent `n` records, oldest first
    fn tail(&self, n: usize) -> Result<Vec<T>, EventStoreError> {
        let mut all = self.read_all()?;
        let skip = all.len().saturating_sub(n);
        Ok(all.split_off(skip))
    }
}

/// One JSON object per line in a flat file
pub struct JsonlEventStore<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonlEventStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    fn io_err(&self, source: std::io::Error) -> EventStoreError {
        EventStoreError::Io { path: self.path.clone(), source }
    }

    fn read_lines(&self) -> Result<Vec<(usize, String)>, EventStoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| (i + 1, line.to_string()))
            .collect())
    }
}

impl<T> EventStore<T> for JsonlEventStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn append(&self, record: &T) -> Result<(), EventStoreError> {
        let line = serde_json::to_string(record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        writeln!(file, "{}", line).map_err(|e| self.io_err(e))?;

        debug!("Appended event to {}", self.path.display());
        Ok(())
    }

    /// Unreadable lines are skipped so one bad entry cannot hide the rest
    fn read_all(&self) -> Result<Vec<T>, EventStoreError> {
        let mut records = Vec::new();
        for (line_no, line) in self.read_lines()? {
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable line {} in {}: {}", line_no, self.path.display(), e),
            }
        }
        Ok(records)
    }

    fn read_last(&self) -> Result<Option<T>, EventStoreError> {
        match self.read_lines()?.pop() {
            Some((line_no, line)) => serde_json::from_str(&line)
                .map(Some)
                .map_err(|source| EventStoreError::Corrupt {
                    path: self.path.clone(),
                    line: line_no,
                    source,
                }),
            None => Ok(None),
        }
    }
}

/// In-process log for tests
#[cfg(test)]
pub struct MemoryEventStore<T> {
    records: std::sync::Mutex<Vec<T>>,
}

#[cfg(test)]
impl<T> MemoryEventStore<T> {
    pub fn new() -> Self {
        Self { records: std::sync::Mutex::new(Vec::new()) }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[cfg(test)]
impl<T> Default for MemoryEventStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl<T> EventStore<T> for MemoryEventStore<T>
where
    T: Clone + Send,
{
    fn append(&self, record: &T) -> Result<(), EventStoreError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<T>, EventStoreError> {
        Ok(self.records.lock().map(|r| r.clone()).unwrap_or_default())
    }

    fn read_last(&self) -> Result<Option<T>, EventStoreError> {
        Ok(self.records.lock().ok().and_then(|r| r.last().cloned()))
    }
}
