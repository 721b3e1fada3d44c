//! Job orchestration: registry, controllers, shared gates and the control
//! surface used by the CLI and the remote-control server.
//!
//! The engine is cheap to clone; all clones share the same jobs, controllers,
//! gates and observers. Shared resources are injected at construction so
//! independent engines (e.g. in tests) never contend with each other unless
//! they are handed the same instances.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::big_file_gate::BigFileGate;
use super::business::{BusinessSoftwareGate, SysinfoProbe};
use super::cipher::XorCipher;
use super::controller::{ControlState, JobController};
use super::encryption_lock::EncryptionLock;
use super::models::{BackupJob, BackupType, JobUpdate, LogRecord, RunOutcome, RunReport};
use super::progress::{ObserverSet, ProgressObserver};
use super::registry::JobRegistry;
use super::runner::JobRun;
use super::transfer_log::{DailyJsonLog, TransferLog};
use crate::config::{AppConfig, ExtensionList};
use crate::db::JobStore;
use crate::error::{EngineError, EngineResult};

/// Marks a job as running for as long as its task lives, including when the
/// task unwinds.
struct ActiveRun {
    engine: Engine,
    job_id: Uuid,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.engine.lock_active().remove(&self.job_id);
    }
}

/// Behavior knobs derived from the configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub encrypted_extensions: ExtensionList,
    pub priority_extensions: ExtensionList,
    /// Files strictly larger than this go through the big file gate
    pub big_file_threshold_bytes: u64,
    /// 0 means no limit
    pub max_concurrent_jobs: usize,
    pub cipher: Option<XorCipher>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            encrypted_extensions: ExtensionList::default(),
            priority_extensions: ExtensionList::default(),
            big_file_threshold_bytes: 1024 * 1024,
            max_concurrent_jobs: 0,
            cipher: None,
        }
    }
}

impl EngineSettings {
    /// Validate the configuration and build the settings. Nothing touches the
    /// filesystem here.
    pub fn from_config(config: &AppConfig) -> EngineResult<Self> {
        if config.big_file_threshold_kb == 0 {
            return Err(EngineError::InvalidConfig(
                "big_file_threshold_kb must be greater than zero".to_string(),
            ));
        }

        let encrypted_extensions = ExtensionList::new(&config.encrypted_extensions);

        let cipher = match config.encryption_key.as_deref() {
            Some(key) => Some(XorCipher::new(key)?),
            None if !encrypted_extensions.is_empty() => {
                return Err(EngineError::InvalidConfig(
                    "encryption_key is required when encrypted_extensions is set".to_string(),
                ));
            }
            None => None,
        };

        Ok(Self {
            encrypted_extensions,
            priority_extensions: ExtensionList::new(&config.priority_extensions),
            big_file_threshold_bytes: config.big_file_threshold_kb.saturating_mul(1024),
            max_concurrent_jobs: config.max_concurrent_jobs,
            cipher,
        })
    }

    pub fn is_big(&self, size: u64) -> bool {
        size > self.big_file_threshold_bytes
    }

    /// The cipher to use for `path`, if the file is on the allow-list.
    pub fn cipher_for(&self, path: &Path) -> Option<&XorCipher> {
        self.cipher
            .as_ref()
            .filter(|_| self.encrypted_extensions.matches(path))
    }
}

/// Instances shared by every job of an engine.
#[derive(Clone)]
pub struct EngineResources {
    pub big_file_gate: Arc<BigFileGate>,
    pub encryption_lock: Arc<EncryptionLock>,
    pub business_gate: Arc<BusinessSoftwareGate>,
    pub transfer_log: Arc<dyn TransferLog>,
}

impl EngineResources {
    pub fn new(
        encryption_lock: EncryptionLock,
        business_gate: BusinessSoftwareGate,
        transfer_log: Arc<dyn TransferLog>,
    ) -> Self {
        Self {
            big_file_gate: Arc::new(BigFileGate::new()),
            encryption_lock: Arc::new(encryption_lock),
            business_gate: Arc::new(business_gate),
            transfer_log,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            EncryptionLock::new(&config.encryption_lock_path),
            BusinessSoftwareGate::new(
                Arc::new(SysinfoProbe),
                config.business_software.clone(),
                Duration::from_millis(config.business_poll_interval_ms),
            ),
            Arc::new(DailyJsonLog::new(&config.log_directory)),
        )
    }
}

/// Result of the encryption-gated save step for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Extension not on the allow-list; file untouched
    Skipped,
    Encrypted { elapsed: Duration },
    Failed(String),
}

impl SaveOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) settings: EngineSettings,
    pub(crate) resources: EngineResources,
    pub(crate) observers: ObserverSet,
    registry: JobRegistry,
    controllers: Mutex<HashMap<Uuid, Arc<JobController>>>,
    active: Mutex<HashSet<Uuid>>,
    run_slots: Option<Arc<Semaphore>>,
    store: Arc<dyn JobStore>,
}

/// Join handle over one or more job runs.
pub struct RunHandle {
    runs: Vec<(Uuid, String, JoinHandle<RunReport>)>,
}

impl RunHandle {
    pub fn job_ids(&self) -> Vec<Uuid> {
        self.runs.iter().map(|(id, _, _)| *id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn merge(handles: impl IntoIterator<Item = RunHandle>) -> Self {
        Self {
            runs: handles.into_iter().flat_map(|h| h.runs).collect(),
        }
    }

    /// Wait for every run to finish.
    pub async fn join(self) -> Vec<RunReport> {
        let mut reports = Vec::with_capacity(self.runs.len());
        for (job_id, job_name, handle) in self.runs {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Job worker failed");
                    RunReport {
                        job_id,
                        job_name,
                        outcome: RunOutcome::Aborted(format!("worker failed: {e}")),
                        files_processed: 0,
                        files_failed: 0,
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        resources: EngineResources,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self::with_registry(settings, resources, store, JobRegistry::new())
    }

    /// Build an engine with the jobs found in `store`.
    pub async fn load(
        settings: EngineSettings,
        resources: EngineResources,
        store: Arc<dyn JobStore>,
    ) -> EngineResult<Self> {
        let jobs = store.load().await?;
        info!(jobs = jobs.len(), "Loaded job definitions");
        Ok(Self::with_registry(
            settings,
            resources,
            store,
            JobRegistry::from_jobs(jobs),
        ))
    }

    fn with_registry(
        settings: EngineSettings,
        resources: EngineResources,
        store: Arc<dyn JobStore>,
        registry: JobRegistry,
    ) -> Self {
        let controllers = registry
            .list()
            .into_iter()
            .map(|j| (j.id, Arc::new(JobController::new())))
            .collect();

        let run_slots = match settings.max_concurrent_jobs {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        Self {
            inner: Arc::new(EngineInner {
                settings,
                resources,
                observers: ObserverSet::new(),
                registry,
                controllers: Mutex::new(controllers),
                active: Mutex::new(HashSet::new()),
                run_slots,
                store,
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn resources(&self) -> &EngineResources {
        &self.inner.resources
    }

    pub fn add_observer(&self, observer: Arc<dyn ProgressObserver>) {
        self.inner.observers.add(observer);
    }

    pub fn list_jobs(&self) -> Vec<BackupJob> {
        self.inner.registry.list()
    }

    pub fn get_job(&self, id: Uuid) -> EngineResult<BackupJob> {
        self.inner.registry.get(id)
    }

    pub async fn add_job(
        &self,
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        backup_type: BackupType,
    ) -> EngineResult<BackupJob> {
        let job = BackupJob::new(name, source, target, backup_type);
        validate_job(&job)?;

        let job = self.inner.registry.add(job);
        self.lock_controllers()
            .insert(job.id, Arc::new(JobController::new()));
        info!(job_id = %job.id, name = %job.name, "Job added");

        self.save().await?;
        Ok(job)
    }

    /// Change a job definition. The result must pass the same checks as
    /// `add_job`, otherwise the stored job is left as it was.
    pub async fn update_job(&self, id: Uuid, update: JobUpdate) -> EngineResult<BackupJob> {
        let job = self.inner.registry.update(id, update, validate_job)?;
        info!(job_id = %job.id, name = %job.name, "Job updated");

        self.save().await?;
        Ok(job)
    }

    /// Remove a job and its controller, stopping it first if it is running.
    pub async fn remove_job(&self, id: Uuid) -> EngineResult<BackupJob> {
        let job = self.inner.registry.remove(id)?;
        if let Some(controller) = self.lock_controllers().remove(&id) {
            controller.stop();
        }
        info!(job_id = %job.id, name = %job.name, "Job removed");

        self.save().await?;
        Ok(job)
    }

    pub fn job_state(&self, id: Uuid) -> Option<ControlState> {
        self.lock_controllers().get(&id).map(|c| c.state())
    }

    pub fn is_running(&self, id: Uuid) -> bool {
        self.lock_active().contains(&id)
    }

    pub fn pause_job(&self, id: Uuid) -> EngineResult<ControlState> {
        Ok(self.controller(id)?.pause())
    }

    pub fn resume_job(&self, id: Uuid) -> EngineResult<ControlState> {
        Ok(self.controller(id)?.resume())
    }

    pub fn stop_job(&self, id: Uuid) -> EngineResult<ControlState> {
        Ok(self.controller(id)?.stop())
    }

    /// Start every job. Jobs that are already running are left alone.
    pub fn execute_all(&self) -> RunHandle {
        let mut runs = Vec::new();
        for job in self.inner.registry.list() {
            match self.start(job) {
                Ok(run) => runs.push(run),
                Err(e) => warn!(error = %e, "Skipping job"),
            }
        }
        RunHandle { runs }
    }

    /// Start the job at 0-based position `index`.
    pub fn execute_by_index(&self, index: usize) -> EngineResult<RunHandle> {
        let job = self.inner.registry.by_index(index)?;
        Ok(RunHandle {
            runs: vec![self.start(job)?],
        })
    }

    pub fn execute_job(&self, id: Uuid) -> EngineResult<RunHandle> {
        let job = self.inner.registry.get(id)?;
        Ok(RunHandle {
            runs: vec![self.start(job)?],
        })
    }

    /// Encryption-gated save step for a single file.
    ///
    /// Files off the allow-list are left untouched. Files above the threshold
    /// wait for the big file gate; stopping the job's current run abandons
    /// that wait. The encryption lock is tried once: when it
    /// is held elsewhere the attempt fails immediately.
    pub async fn save_file(&self, path: &Path, job: &BackupJob) -> SaveOutcome {
        let inner = &self.inner;
        let Some(cipher) = inner.settings.cipher_for(path).cloned() else {
            return SaveOutcome::Skipped;
        };

        let size = match tokio::fs::metadata(path).await {
            Ok(m) => m.len(),
            Err(e) => {
                let outcome = SaveOutcome::Failed(e.to_string());
                inner.log_file(job, path, path, 0, None, &outcome);
                return outcome;
            }
        };

        let _gate = if inner.settings.is_big(size) {
            let cancel = self.run_cancellation(job.id);
            match inner.resources.big_file_gate.acquire_until(job.id, &cancel).await {
                Some(guard) => Some(guard),
                None => {
                    let reason = "job stopped while waiting for the big file gate";
                    let outcome = SaveOutcome::Failed(reason.to_string());
                    inner.log_file(job, path, path, size, None, &outcome);
                    return outcome;
                }
            }
        } else {
            None
        };

        let outcome = inner.encrypt(path, cipher).await;
        inner.log_file(job, path, path, size, Some(Duration::ZERO), &outcome);
        outcome
    }

    fn start(&self, job: BackupJob) -> EngineResult<(Uuid, String, JoinHandle<RunReport>)> {
        if !self.lock_active().insert(job.id) {
            return Err(EngineError::AlreadyRunning(job.name));
        }

        // A fresh controller per run: a stopped one is terminal
        let controller = Arc::new(JobController::new());
        self.lock_controllers().insert(job.id, controller.clone());

        let engine = self.clone();
        let job_id = job.id;
        let job_name = job.name.clone();
        let span = info_span!("job_run", job_id = %job.id, job = %job.name);

        let handle = tokio::spawn(
            async move {
                let active = ActiveRun {
                    engine: engine.clone(),
                    job_id,
                };
                let report = engine.run(job, controller).await;
                drop(active);
                engine.flush().await;
                report
            }
            .instrument(span),
        );

        Ok((job_id, job_name, handle))
    }

    async fn run(&self, job: BackupJob, controller: Arc<JobController>) -> RunReport {
        let started = Instant::now();

        let _slot = match &self.inner.run_slots {
            Some(slots) => {
                debug!("Waiting for a free job slot");
                tokio::select! {
                    _ = controller.cancellation().cancelled() => None,
                    permit = slots.clone().acquire_owned() => permit.ok(),
                }
            }
            None => None,
        };

        let report = JobRun::new(&self.inner, &job, &controller).execute().await;

        info!(
            outcome = ?report.outcome,
            files_processed = report.files_processed,
            files_failed = report.files_failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Job run finished"
        );
        report
    }

    /// Stop token of the job's current run. Outside a run nothing can cancel.
    fn run_cancellation(&self, id: Uuid) -> CancellationToken {
        if !self.is_running(id) {
            return CancellationToken::new();
        }
        self.lock_controllers()
            .get(&id)
            .map(|c| c.cancellation().clone())
            .unwrap_or_default()
    }

    fn controller(&self, id: Uuid) -> EngineResult<Arc<JobController>> {
        self.lock_controllers()
            .get(&id)
            .cloned()
            .ok_or(EngineError::JobNotFound(id))
    }

    async fn save(&self) -> EngineResult<()> {
        self.inner.store.save(&self.inner.registry.list()).await?;
        Ok(())
    }

    /// Persist after a run; failures are logged, never propagated.
    async fn flush(&self) {
        if let Err(e) = self.save().await {
            warn!(error = %e, "Failed to persist jobs");
        }
    }

    fn lock_controllers(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<JobController>>> {
        self.inner
            .controllers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    fn lock_active(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.inner.active.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl EngineInner {
    /// Encrypt `path` in place under the encryption lock.
    pub(crate) async fn encrypt(&self, path: &Path, cipher: XorCipher) -> SaveOutcome {
        let lock = self.resources.encryption_lock.clone();
        let path = path.to_path_buf();

        let result = tokio::task::spawn_blocking(move || {
            let Some(_guard) = lock.try_acquire().map_err(|e| e.to_string())? else {
                return Err("encryption lock is held by another process".to_string());
            };

            let start = Instant::now();
            cipher.apply_file(&path).map_err(|e| e.to_string())?;
            Ok(start.elapsed())
        })
        .await;

        match result {
            Ok(Ok(elapsed)) => SaveOutcome::Encrypted { elapsed },
            Ok(Err(message)) => SaveOutcome::Failed(message),
            Err(e) => SaveOutcome::Failed(format!("encryption task failed: {e}")),
        }
    }

    pub(crate) fn record(&self, record: LogRecord) {
        if record.is_error() {
            warn!(source = %record.source, status = %record.status, "File operation failed");
        }
        if let Err(e) = self.resources.transfer_log.append(&record) {
            warn!(error = %e, "Failed to write transfer log");
        }
    }

    /// Log the outcome of one file. `transfer` is `None` when the copy failed.
    pub(crate) fn log_file(
        &self,
        job: &BackupJob,
        source: &Path,
        target: &Path,
        size: u64,
        transfer: Option<Duration>,
        outcome: &SaveOutcome,
    ) {
        let (transfer_ms, encryption_ms, status) = match (transfer, outcome) {
            (Some(t), SaveOutcome::Skipped) => (millis(t), 0, "Success".to_string()),
            // 0 means "not encrypted", so a sub-millisecond run reports 1
            (Some(t), SaveOutcome::Encrypted { elapsed }) => {
                (millis(t), millis(*elapsed).max(1), "Success".to_string())
            }
            (_, SaveOutcome::Failed(message)) => (-1, -1, format!("Error: {message}")),
            (None, _) => (-1, -1, "Error: transfer failed".to_string()),
        };

        self.record(LogRecord {
            timestamp: chrono::Local::now(),
            job_name: job.name.clone(),
            source: source.display().to_string(),
            target: target.display().to_string(),
            file_size: size,
            transfer_time_ms: transfer_ms,
            encryption_time_ms: encryption_ms,
            status,
        });
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn validate_job(job: &BackupJob) -> EngineResult<()> {
    if job.name.trim().is_empty() {
        return Err(EngineError::InvalidJob("name must not be empty".to_string()));
    }
    if job.source.as_os_str().is_empty() || job.target.as_os_str().is_empty() {
        return Err(EngineError::InvalidJob(
            "source and target must not be empty".to_string(),
        ));
    }
    if job.target.starts_with(&job.source) {
        return Err(EngineError::InvalidJob(
            "target must not be inside the source directory".to_string(),
        ));
    }
    Ok(())
}
