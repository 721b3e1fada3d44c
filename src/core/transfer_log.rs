//! Per-file transfer records.
//!
//! This is the audit trail of what each job did to each file, separate from
//! the `tracing` diagnostics. Sinks are shared by every job of an engine.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;

use super::models::LogRecord;

pub trait TransferLog: Send + Sync {
    fn append(&self, record: &LogRecord) -> Result<()>;
}

/// Writes one JSON object per line into `<dir>/<YYYY-MM-DD>.jsonl`.
pub struct DailyJsonLog {
    directory: PathBuf,
    // Serializes appends from concurrent jobs
    write_lock: Mutex<()>,
}

impl DailyJsonLog {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of today's log file.
    pub fn current_file(&self) -> PathBuf {
        self.directory
            .join(format!("{}.jsonl", Local::now().format("%Y-%m-%d")))
    }
}

impl TransferLog for DailyJsonLog {
    fn append(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("Failed to serialize log record")?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        fs::create_dir_all(&self.directory).with_context(|| {
            format!("Failed to create log directory {}", self.directory.display())
        })?;

        let path = self.current_file();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write log file {}", path.display()))?;

        Ok(())
    }
}

/// Keeps records in memory. Used by tests and embedders that forward records
/// elsewhere.
#[derive(Default)]
pub struct MemoryTransferLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryTransferLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl TransferLog for MemoryTransferLog {
    fn append(&self, record: &LogRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(record.clone());
        Ok(())
    }
}
