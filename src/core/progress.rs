//! Snapshot fan-out and the in-memory progress store.
//!
//! Observers are called synchronously from the job's worker under one lock
//! shared by all jobs of an engine, so two jobs never interleave writes into
//! a shared sink. Observers must return quickly: a slow observer stalls the
//! job that produced the snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use super::models::StateSnapshot;

pub trait ProgressObserver: Send + Sync {
    fn update(&self, snapshot: &StateSnapshot);
}

/// Ordered list of observers with serialized delivery.
#[derive(Default)]
pub struct ObserverSet {
    observers: Mutex<Vec<Arc<dyn ProgressObserver>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn ProgressObserver>) {
        self.lock().push(observer);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver a snapshot to every observer, in registration order.
    pub fn notify(&self, snapshot: &StateSnapshot) {
        let observers = self.lock();
        for observer in observers.iter() {
            observer.update(snapshot);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn ProgressObserver>>> {
        self.observers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Thread-safe store of the latest snapshot of every job.
///
/// Shared with the remote-control server so `status` queries never touch the
/// workers.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<HashMap<Uuid, StateSnapshot>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: Uuid) -> Option<StateSnapshot> {
        self.read().get(&job_id).cloned()
    }

    pub fn remove(&self, job_id: Uuid) {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&job_id);
    }

    /// All snapshots, ordered by job id.
    pub fn get_all(&self) -> Vec<StateSnapshot> {
        let mut all: Vec<_> = self.read().values().cloned().collect();
        all.sort_by_key(|s| s.job_id);
        all
    }

    /// Number of jobs whose latest snapshot is not terminal.
    pub fn active_count(&self) -> usize {
        self.read().values().filter(|s| !s.status.is_terminal()).count()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, StateSnapshot>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProgressObserver for ProgressTracker {
    fn update(&self, snapshot: &StateSnapshot) {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(snapshot.job_id, snapshot.clone());
    }
}
