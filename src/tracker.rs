//! Experiment tracking sinks for scalar training metrics.
//!
//! The training loop reports one `loss` record per iteration through the
//! [`ExperimentTracker`] trait. [`MemoryTracker`] keeps records in memory
//! (tests, summaries); [`JsonlTracker`] appends one JSON object per line to a
//! file.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single logged scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Iteration the value belongs to
    pub step: u64,
    /// Metric name
    pub name: String,
    /// Metric value
    pub value: f64,
}

/// Sink for scalar metrics.
pub trait ExperimentTracker {
    /// Records `value` for `name` at `step`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tracker`] if the record cannot be stored.
    fn log_scalar(&mut self, step: u64, name: &str, value: f64) -> Result<()>;

    /// Flushes buffered records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tracker`] if buffered records cannot be written.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: ExperimentTracker + ?Sized> ExperimentTracker for &mut T {
    fn log_scalar(&mut self, step: u64, name: &str, value: f64) -> Result<()> {
        (**self).log_scalar(step, name, value)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// In-memory tracker.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    records: Vec<MetricRecord>,
}

impl MemoryTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in logging order.
    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    /// Values logged under `name`, in logging order.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.value)
            .collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ExperimentTracker for MemoryTracker {
    fn log_scalar(&mut self, step: u64, name: &str, value: f64) -> Result<()> {
        self.records.push(MetricRecord {
            step,
            name: name.to_string(),
            value,
        });
        Ok(())
    }
}

/// Appends records to a JSON-lines file.
#[derive(Debug)]
pub struct JsonlTracker {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlTracker {
    /// Opens `path` for appending, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io(e, &path))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every record in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is not a
    /// record.
    pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<MetricRecord>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::io(e, path))?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl ExperimentTracker for JsonlTracker {
    fn log_scalar(&mut self, step: u64, name: &str, value: f64) -> Result<()> {
        let record = MetricRecord {
            step,
            name: name.to_string(),
            value,
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| Error::tracker(format!("cannot encode {name}: {e}")))?;
        writeln!(self.writer, "{line}")
            .map_err(|e| Error::tracker(format!("{}: {e}", self.path.display())))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::tracker(format!("{}: {e}", self.path.display())))
    }
}

impl Drop for JsonlTracker {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
