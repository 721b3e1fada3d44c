//! Library error type.
//!
//! Per-file failures never surface here: they are recorded in the transfer log
//! and the job moves on. `EngineError` covers control-surface misuse and
//! configuration problems that must be rejected before any I/O happens.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::core::cipher::MIN_KEY_CHARS;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("No job at position {0}")]
    IndexOutOfRange(usize),

    #[error("Job '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Invalid backup type '{0}' (expected 'full' or 'differential')")]
    InvalidBackupType(String),

    #[error("Encryption key must be at least {MIN_KEY_CHARS} characters")]
    KeyTooShort,

    #[error("Invalid job definition: {0}")]
    InvalidJob(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Job store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
