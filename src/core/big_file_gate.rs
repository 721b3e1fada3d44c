//! Process-wide gate allowing one large-file transfer at a time.
//!
//! One instance is shared by every job of an engine. Waiters queue on an async
//! mutex; releasing the guard hands the gate to exactly one waiter.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct BigFileGate {
    slot: Mutex<()>,
    acquisitions: AtomicU64,
    holders: AtomicUsize,
    peak_holders: AtomicUsize,
}

#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct BigFileGuard<'a> {
    _slot: MutexGuard<'a, ()>,
    gate: &'a BigFileGate,
    job_id: Uuid,
}

impl Drop for BigFileGuard<'_> {
    fn drop(&mut self) {
        self.gate.holders.fetch_sub(1, Ordering::SeqCst);
        debug!(job_id = %self.job_id, "Big file gate released");
    }
}

impl BigFileGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other job holds the gate, then take it.
    pub async fn acquire(&self, job_id: Uuid) -> BigFileGuard<'_> {
        let slot = self.slot.lock().await;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_holders.fetch_max(holders, Ordering::SeqCst);
        debug!(job_id = %job_id, "Big file gate acquired");
        BigFileGuard {
            _slot: slot,
            gate: self,
            job_id,
        }
    }

    /// Like `acquire`, but gives up with `None` once `cancel` fires.
    pub async fn acquire_until(
        &self,
        job_id: Uuid,
        cancel: &CancellationToken,
    ) -> Option<BigFileGuard<'_>> {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_id = %job_id, "Stopped while waiting for the big file gate");
                None
            }
            guard = self.acquire(job_id) => Some(guard),
        }
    }

    pub fn is_held(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    /// Total number of times the gate has been granted.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Highest number of guards ever alive at once. Never above 1.
    pub fn peak_holders(&self) -> usize {
        self.peak_holders.load(Ordering::SeqCst)
    }
}
