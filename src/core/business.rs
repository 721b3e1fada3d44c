//! Suspends backups while a designated "business" process is running.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Source of truth for "is this process running?".
pub trait ProcessProbe: Send + Sync {
    fn is_running(&self, process_name: &str) -> Result<bool>;
}

/// Probe backed by the OS process table.
#[derive(Debug, Default)]
pub struct SysinfoProbe;

impl ProcessProbe for SysinfoProbe {
    fn is_running(&self, process_name: &str) -> Result<bool> {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );

        let wanted = normalize_process_name(process_name);
        Ok(system
            .processes()
            .values()
            .any(|p| normalize_process_name(&p.name().to_string_lossy()) == wanted))
    }
}

/// Lowercase and drop a trailing `.exe` so "Calc.exe" matches "calc".
fn normalize_process_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_suffix(".exe") {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

/// Result of waiting for the business software to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWait {
    /// The process was not running
    Clear,
    /// The process was running and has since exited
    Resumed,
    /// Stop was requested while waiting
    Cancelled,
}

pub struct BusinessSoftwareGate {
    probe: Arc<dyn ProcessProbe>,
    process_name: Option<String>,
    poll_interval: Duration,
}

impl BusinessSoftwareGate {
    pub fn new(
        probe: Arc<dyn ProcessProbe>,
        process_name: Option<String>,
        poll_interval: Duration,
    ) -> Self {
        let process_name = process_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Self {
            probe,
            process_name,
            poll_interval,
        }
    }

    /// A gate that never blocks.
    pub fn disabled() -> Self {
        Self::new(Arc::new(SysinfoProbe), None, Duration::from_secs(1))
    }

    pub fn process_name(&self) -> Option<&str> {
        self.process_name.as_deref()
    }

    /// Whether the business software is currently running.
    ///
    /// Probe failures count as "not running" so a broken probe can never hold
    /// backups hostage.
    pub async fn is_blocked(&self) -> bool {
        let Some(name) = self.process_name.clone() else {
            return false;
        };

        let probe = self.probe.clone();
        let result = tokio::task::spawn_blocking(move || probe.is_running(&name)).await;

        match result {
            Ok(Ok(running)) => running,
            Ok(Err(e)) => {
                warn!(error = %e, "Process probe failed, assuming business software is absent");
                false
            }
            Err(e) => {
                warn!(error = %e, "Process probe task failed, assuming business software is absent");
                false
            }
        }
    }

    /// Poll until the business software is gone.
    ///
    /// `on_blocked` runs once, on the transition into the blocked state.
    pub async fn wait_until_clear(
        &self,
        cancel: &CancellationToken,
        on_blocked: impl FnOnce(),
    ) -> GateWait {
        if cancel.is_cancelled() {
            return GateWait::Cancelled;
        }
        if !self.is_blocked().await {
            return GateWait::Clear;
        }

        debug!(process = ?self.process_name, "Business software detected, waiting");
        on_blocked();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return GateWait::Cancelled,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if !self.is_blocked().await {
                debug!(process = ?self.process_name, "Business software exited, resuming");
                return GateWait::Resumed;
            }
        }
    }
}
