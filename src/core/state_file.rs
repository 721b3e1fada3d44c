//! Real-time state file: the latest snapshot of every job, rewritten on each
//! update.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;
use uuid::Uuid;

use super::models::StateSnapshot;
use super::progress::ProgressObserver;

pub struct StateFileObserver {
    path: PathBuf,
    states: Mutex<BTreeMap<Uuid, StateSnapshot>>,
}

impl StateFileObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            states: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, states: &BTreeMap<Uuid, StateSnapshot>) -> Result<()> {
        let all: Vec<&StateSnapshot> = states.values().collect();
        let json = serde_json::to_vec_pretty(&all).context("Failed to serialize state")?;

        // Write next to the target then rename, so readers never see half a file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl ProgressObserver for StateFileObserver {
    fn update(&self, snapshot: &StateSnapshot) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states.insert(snapshot.job_id, snapshot.clone());

        if let Err(e) = self.write(&states) {
            warn!(path = %self.path.display(), error = %e, "Failed to update state file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::JobStatus;
    use chrono::Local;
    use tempfile::tempdir;

    fn snapshot(job_id: Uuid, name: &str, remaining: u64) -> StateSnapshot {
        StateSnapshot {
            job_id,
            name: name.to_string(),
            status: JobStatus::Active,
            total_files: 2,
            total_size: 20,
            remaining_files: remaining,
            remaining_size: remaining * 10,
            current_source_file: "/src/a".to_string(),
            current_target_file: "/dst/a".to_string(),
            progress_percentage: 0,
            last_action_time: Local::now(),
        }
    }

    #[test]
    fn test_keeps_latest_snapshot_per_job() {
        let temp = tempdir().unwrap();
        let observer = StateFileObserver::new(temp.path().join("state.json"));

        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        observer.update(&snapshot(a, "a", 2));
        observer.update(&snapshot(b, "b", 2));
        observer.update(&snapshot(a, "a", 1));

        let content = std::fs::read_to_string(observer.path()).unwrap();
        let parsed: Vec<StateSnapshot> = serde_json::from_str(&content).unwrap();

        assert_eq!(parsed.len(), 2);
        let a_state = parsed.iter().find(|s| s.job_id == a).unwrap();
        assert_eq!(a_state.remaining_files, 1);
    }

    #[test]
    fn test_unwritable_path_does_not_panic() {
        let temp = tempdir().unwrap();
        let observer = StateFileObserver::new(temp.path().join("missing/dir/state.json"));
        observer.update(&snapshot(Uuid::now_v7(), "a", 1));
        assert!(!observer.path().exists());
    }
}
