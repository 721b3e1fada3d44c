//! One run of one job.
//!
//! Stop is observed at every loop boundary: the business-software wait, the
//! pause gate and the start of each file. A job queued on the big file gate
//! also gives up its place when stopped. Nothing already written to the
//! target is ever rolled back.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, info, warn};

use super::business::GateWait;
use super::controller::JobController;
use super::engine::{EngineInner, SaveOutcome};
use super::models::{BackupJob, JobStatus, LogRecord, RunOutcome, RunReport, StateSnapshot};
use super::scan::{ScanResult, SourceFile, order_by_priority, scan_directory};
use super::strategy::BackupStrategy;
use crate::error::EngineError;
use crate::logging::LogThrottle;

const BUSINESS_DETECTED: &str = "Paused: business software detected";
const BUSINESS_INTERRUPTED: &str = "Interrupted: business software detected";

/// What happened to a single file.
enum FileResult {
    Copied,
    UpToDate,
    Failed,
    /// Stopped before the file was touched
    Cancelled,
}

pub(crate) struct JobRun<'a> {
    engine: &'a EngineInner,
    job: &'a BackupJob,
    controller: &'a JobController,
    strategy: BackupStrategy,
    scanned: bool,
    total_files: u64,
    total_size: u64,
    processed_files: u64,
    processed_size: u64,
    failed_files: u64,
    current_source: String,
    current_target: String,
    throttle: LogThrottle,
}

impl<'a> JobRun<'a> {
    pub(crate) fn new(
        engine: &'a EngineInner,
        job: &'a BackupJob,
        controller: &'a JobController,
    ) -> Self {
        Self {
            engine,
            job,
            controller,
            strategy: BackupStrategy::from(job.backup_type),
            scanned: false,
            total_files: 0,
            total_size: 0,
            processed_files: 0,
            processed_size: 0,
            failed_files: 0,
            current_source: String::new(),
            current_target: String::new(),
            throttle: LogThrottle::new(Duration::from_millis(500)),
        }
    }

    pub(crate) async fn execute(mut self) -> RunReport {
        let outcome = self.execute_inner().await;
        self.finalize(&outcome);

        RunReport {
            job_id: self.job.id,
            job_name: self.job.name.clone(),
            outcome,
            files_processed: self.processed_files,
            files_failed: self.failed_files,
        }
    }

    async fn execute_inner(&mut self) -> RunOutcome {
        info!(
            source = %self.job.source.display(),
            target = %self.job.target.display(),
            backup_type = %self.job.backup_type,
            "Starting job"
        );

        if !self.wait_for_business_software().await {
            return RunOutcome::Stopped;
        }

        let scan = match self.prepare().await {
            Ok(scan) => scan,
            Err(reason) => return RunOutcome::Aborted(reason),
        };

        self.scanned = true;
        self.total_files = scan.files.len() as u64;
        self.total_size = scan.total_bytes;
        self.emit(JobStatus::Active);

        let files = order_by_priority(scan.files, &self.engine.settings.priority_extensions);

        for file in files {
            if !self.wait_for_business_software().await {
                return RunOutcome::Stopped;
            }

            if !self.controller.is_gate_open() {
                self.emit(JobStatus::Paused);
            }
            if !self.controller.wait_while_paused().await {
                return RunOutcome::Stopped;
            }
            if self.controller.is_cancelled() {
                return RunOutcome::Stopped;
            }

            let result = self.process_file(&file).await;
            if matches!(result, FileResult::Cancelled) {
                return RunOutcome::Stopped;
            }

            self.processed_files += 1;
            self.processed_size += file.size;
            if matches!(result, FileResult::Failed) {
                self.failed_files += 1;
            }

            let status = if self.percentage() >= 100 {
                JobStatus::Finished
            } else {
                JobStatus::Active
            };
            self.emit(status);

            if self.throttle.should_log() {
                debug!(
                    processed = self.processed_files,
                    total = self.total_files,
                    percentage = self.percentage(),
                    "Job progress"
                );
            }

            // Checked after every file, whatever its result
            if self.engine.resources.business_gate.is_blocked().await {
                warn!("Business software started during the run, interrupting job");
                self.engine
                    .record(LogRecord::event(self.job, BUSINESS_INTERRUPTED));
                return RunOutcome::Interrupted;
            }
        }

        RunOutcome::Completed
    }

    /// Check the source, create the target and snapshot the source tree.
    async fn prepare(&mut self) -> Result<ScanResult, String> {
        let source = self.job.source.clone();

        let is_dir = tokio::fs::metadata(&source)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            let reason = EngineError::SourceNotFound(source).to_string();
            return Err(self.setup_failed(reason));
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.job.target).await {
            let reason = format!(
                "Failed to create target directory {}: {}",
                self.job.target.display(),
                e
            );
            return Err(self.setup_failed(reason));
        }

        let scan = tokio::task::spawn_blocking(move || scan_directory(&source)).await;
        match scan {
            Ok(Ok(scan)) => {
                info!(
                    total_files = scan.files.len(),
                    total_bytes = scan.total_bytes,
                    "Scan complete"
                );
                Ok(scan)
            }
            Ok(Err(e)) => Err(self.setup_failed(format!("Failed to scan source directory: {e}"))),
            Err(e) => Err(self.setup_failed(format!("Scan task failed: {e}"))),
        }
    }

    fn setup_failed(&mut self, reason: String) -> String {
        warn!(reason = %reason, "Job setup failed");
        self.engine
            .record(LogRecord::event(self.job, format!("Error: {reason}")));
        reason
    }

    async fn process_file(&mut self, file: &SourceFile) -> FileResult {
        let target = self.job.target.join(&file.relative);
        self.current_source = file.path.display().to_string();
        self.current_target = target.display().to_string();

        let strategy = self.strategy;
        let should_copy = {
            let (source, target) = (file.path.clone(), target.clone());
            tokio::task::spawn_blocking(move || strategy.should_copy(&source, &target))
                .await
                .unwrap_or(true)
        };

        if !should_copy {
            debug!(file = %file.relative.display(), "Target is up to date");
            self.engine.record(LogRecord {
                status: "Skipped: target is up to date".to_string(),
                source: self.current_source.clone(),
                target: self.current_target.clone(),
                file_size: file.size,
                ..LogRecord::event(self.job, "")
            });
            return FileResult::UpToDate;
        }

        let _gate = if self.engine.settings.is_big(file.size) {
            let gate = &self.engine.resources.big_file_gate;
            match gate
                .acquire_until(self.job.id, self.controller.cancellation())
                .await
            {
                Some(guard) => Some(guard),
                None => return FileResult::Cancelled,
            }
        } else {
            None
        };

        let transfer = match copy(strategy, &file.path, &target).await {
            Ok(elapsed) => elapsed,
            Err(message) => {
                let outcome = SaveOutcome::Failed(message);
                self.engine
                    .log_file(self.job, &file.path, &target, file.size, None, &outcome);
                return FileResult::Failed;
            }
        };

        let outcome = match self.engine.settings.cipher_for(&target).cloned() {
            Some(cipher) => self.engine.encrypt(&target, cipher).await,
            None => SaveOutcome::Skipped,
        };

        self.engine.log_file(
            self.job,
            &file.path,
            &target,
            file.size,
            Some(transfer),
            &outcome,
        );

        if outcome.is_failure() {
            FileResult::Failed
        } else {
            FileResult::Copied
        }
    }

    /// Returns `false` when the job was stopped while waiting.
    async fn wait_for_business_software(&self) -> bool {
        let gate = &self.engine.resources.business_gate;
        let wait = gate
            .wait_until_clear(self.controller.cancellation(), || {
                info!(process = ?gate.process_name(), "Business software detected, job suspended");
                self.engine
                    .record(LogRecord::event(self.job, BUSINESS_DETECTED));
                self.emit(JobStatus::Waiting);
            })
            .await;

        match wait {
            GateWait::Clear => true,
            GateWait::Resumed => {
                info!("Business software exited, job resumed");
                self.emit(JobStatus::Active);
                true
            }
            GateWait::Cancelled => false,
        }
    }

    fn finalize(&mut self, outcome: &RunOutcome) {
        let (status, label) = match outcome {
            RunOutcome::Completed => (JobStatus::Finished, "Finished".to_string()),
            RunOutcome::Stopped => (JobStatus::Stopped, "Stopped".to_string()),
            RunOutcome::Interrupted => (JobStatus::Interrupted, "Interrupted".to_string()),
            RunOutcome::Aborted(reason) => (JobStatus::Failed, format!("Failed: {reason}")),
        };

        // The last per-file snapshot already reported a completed run
        let already_reported = matches!(outcome, RunOutcome::Completed) && self.total_files > 0;
        if !already_reported {
            self.current_source.clear();
            self.current_target.clear();
            self.emit(status);
        }

        self.engine.record(LogRecord::event(self.job, label));
    }

    fn percentage(&self) -> u8 {
        if !self.scanned {
            return 0;
        }
        if self.total_files == 0 {
            return 100;
        }
        ((self.processed_files * 100) / self.total_files).min(100) as u8
    }

    fn emit(&self, status: JobStatus) {
        let snapshot = StateSnapshot {
            job_id: self.job.id,
            name: self.job.name.clone(),
            status,
            total_files: self.total_files,
            total_size: self.total_size,
            remaining_files: self.total_files - self.processed_files,
            remaining_size: self.total_size.saturating_sub(self.processed_size),
            current_source_file: self.current_source.clone(),
            current_target_file: self.current_target.clone(),
            progress_percentage: self.percentage(),
            last_action_time: Local::now(),
        };
        self.engine.observers.notify(&snapshot);
    }
}

/// Copy one file on the blocking pool, returning the transfer time.
async fn copy(strategy: BackupStrategy, source: &Path, target: &Path) -> Result<Duration, String> {
    let (source, target): (PathBuf, PathBuf) = (source.to_path_buf(), target.to_path_buf());

    tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        strategy
            .copy(&source, &target)
            .map_err(|e| format!("{}: {}", source.display(), e))?;
        Ok(start.elapsed())
    })
    .await
    .map_err(|e| format!("copy task failed: {e}"))?
}
