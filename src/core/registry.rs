//! In-memory, ordered set of job definitions.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use super::models::{BackupJob, JobUpdate};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<Vec<BackupJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from persisted jobs, keeping their stored order.
    pub fn from_jobs(mut jobs: Vec<BackupJob>) -> Self {
        jobs.sort_by_key(|j| j.ordinal);
        renumber(&mut jobs);
        Self {
            jobs: RwLock::new(jobs),
        }
    }

    /// Append a job; its ordinal becomes the next display position.
    pub fn add(&self, mut job: BackupJob) -> BackupJob {
        let mut jobs = self.write();
        job.ordinal = jobs.len() + 1;
        jobs.push(job.clone());
        job
    }

    pub fn remove(&self, id: Uuid) -> EngineResult<BackupJob> {
        let mut jobs = self.write();
        let pos = jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or(EngineError::JobNotFound(id))?;
        let removed = jobs.remove(pos);
        renumber(&mut jobs);
        Ok(removed)
    }

    /// Apply `update` to a copy of the job and commit it only if `check`
    /// accepts the result.
    pub fn update<F>(&self, id: Uuid, update: JobUpdate, check: F) -> EngineResult<BackupJob>
    where
        F: FnOnce(&BackupJob) -> EngineResult<()>,
    {
        let mut jobs = self.write();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(EngineError::JobNotFound(id))?;

        let mut candidate = job.clone();
        if let Some(name) = update.name {
            candidate.name = name;
        }
        if let Some(source) = update.source {
            candidate.source = source;
        }
        if let Some(target) = update.target {
            candidate.target = target;
        }
        if let Some(backup_type) = update.backup_type {
            candidate.backup_type = backup_type;
        }

        check(&candidate)?;
        *job = candidate;
        Ok(job.clone())
    }

    pub fn get(&self, id: Uuid) -> EngineResult<BackupJob> {
        self.read()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or(EngineError::JobNotFound(id))
    }

    /// Look up a job by 0-based position.
    pub fn by_index(&self, index: usize) -> EngineResult<BackupJob> {
        self.read()
            .get(index)
            .cloned()
            .ok_or(EngineError::IndexOutOfRange(index))
    }

    pub fn list(&self) -> Vec<BackupJob> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<BackupJob>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<BackupJob>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn renumber(jobs: &mut [BackupJob]) {
    for (i, job) in jobs.iter_mut().enumerate() {
        job.ordinal = i + 1;
    }
}
