use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// A configured unit of backup work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJob {
    pub id: Uuid,
    pub name: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub backup_type: BackupType,
    /// 1-based display position
    pub ordinal: usize,
}

impl BackupJob {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        backup_type: BackupType,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            source: source.into(),
            target: target.into(),
            backup_type,
            ordinal: 0,
        }
    }
}

/// Mutable part of a job definition, applied by `Engine::update_job`.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub source: Option<PathBuf>,
    pub target: Option<PathBuf>,
    pub backup_type: Option<BackupType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    Full,
    Differential,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Differential => "differential",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" | "complete" => Ok(Self::Full),
            "differential" | "diff" => Ok(Self::Differential),
            _ => Err(EngineError::InvalidBackupType(s.to_string())),
        }
    }
}

/// Status label carried by every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Inactive,
    Active,
    /// Business software is running; the job waits for it to exit
    Waiting,
    Paused,
    Stopped,
    Interrupted,
    Failed,
    Finished,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Interrupted | Self::Failed | Self::Finished
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Inactive => "Inactive",
            Self::Active => "Active",
            Self::Waiting => "Waiting",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Interrupted => "Interrupted",
            Self::Failed => "Failed",
            Self::Finished => "Finished",
        };
        f.write_str(label)
    }
}

/// Immutable record of a job's progress at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub job_id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub total_files: u64,
    pub total_size: u64,
    pub remaining_files: u64,
    pub remaining_size: u64,
    pub current_source_file: String,
    pub current_target_file: String,
    pub progress_percentage: u8,
    pub last_action_time: DateTime<Local>,
}

/// One entry of the transfer log.
///
/// Timing fields are milliseconds; `-1` marks a failed transfer or encryption,
/// and an encryption time of `0` means the file was not encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub job_name: String,
    pub source: String,
    pub target: String,
    pub file_size: u64,
    pub transfer_time_ms: i64,
    pub encryption_time_ms: i64,
    pub status: String,
}

impl LogRecord {
    /// A job-level event with no file attached.
    pub fn event(job: &BackupJob, status: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            job_name: job.name.clone(),
            source: job.source.display().to_string(),
            target: job.target.display().to_string(),
            file_size: 0,
            transfer_time_ms: 0,
            encryption_time_ms: 0,
            status: status.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.starts_with("Error")
    }
}

/// How a single job run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Completed,
    Stopped,
    Interrupted,
    Aborted(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub job_id: Uuid,
    pub job_name: String,
    pub outcome: RunOutcome,
    pub files_processed: u64,
    pub files_failed: u64,
}
