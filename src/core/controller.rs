//! Per-job runtime control: state machine, pause gate and cancellation.
//!
//! The pause gate and the cancellation token are independent. Stop cancels
//! *and* reopens the gate so a worker parked on it wakes up and sees the
//! cancellation.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlState {
    Running,
    Paused,
    /// Terminal: a stopped controller is never reused
    Stopped,
}

#[derive(Debug)]
pub struct JobController {
    state: Mutex<ControlState>,
    gate: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl Default for JobController {
    fn default() -> Self {
        Self::new()
    }
}

impl JobController {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(ControlState::Running),
            gate,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ControlState {
        *self.lock_state()
    }

    /// Running -> Paused. No-op in any other state.
    pub fn pause(&self) -> ControlState {
        let mut state = self.lock_state();
        if *state == ControlState::Running {
            *state = ControlState::Paused;
            self.gate.send_replace(false);
            debug!("Job paused");
        }
        *state
    }

    /// Paused -> Running. No-op in any other state.
    pub fn resume(&self) -> ControlState {
        let mut state = self.lock_state();
        if *state == ControlState::Paused {
            *state = ControlState::Running;
            self.gate.send_replace(true);
            debug!("Job resumed");
        }
        *state
    }

    /// Running or Paused -> Stopped.
    pub fn stop(&self) -> ControlState {
        let mut state = self.lock_state();
        if *state != ControlState::Stopped {
            *state = ControlState::Stopped;
            self.cancel.cancel();
            self.gate.send_replace(true);
            debug!("Job stopped");
        }
        *state
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_gate_open(&self) -> bool {
        *self.gate.borrow()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Block until the pause gate is open or the job is stopped.
    ///
    /// Returns `false` when the job was stopped.
    pub async fn wait_while_paused(&self) -> bool {
        let mut rx = self.gate.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            // The sender lives as long as `self`, so this cannot fail.
            result = rx.wait_for(|open| *open) => result.is_ok() && !self.cancel.is_cancelled(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_initial_state_is_running() {
        let controller = JobController::new();
        assert_eq!(controller.state(), ControlState::Running);
        assert!(controller.is_gate_open());
        assert!(!controller.is_cancelled());
    }

    #[test]
    fn test_transition_table() {
        let controller = JobController::new();

        // Running: resume is a no-op
        assert_eq!(controller.resume(), ControlState::Running);

        assert_eq!(controller.pause(), ControlState::Paused);
        assert!(!controller.is_gate_open());

        // Paused: pause is a no-op
        assert_eq!(controller.pause(), ControlState::Paused);

        assert_eq!(controller.resume(), ControlState::Running);
        assert!(controller.is_gate_open());

        assert_eq!(controller.stop(), ControlState::Stopped);
        assert!(controller.is_cancelled());

        // Stopped is terminal
        assert_eq!(controller.pause(), ControlState::Stopped);
        assert_eq!(controller.resume(), ControlState::Stopped);
        assert_eq!(controller.stop(), ControlState::Stopped);
        assert!(controller.is_gate_open());
    }

    #[test]
    fn test_stop_from_paused_opens_gate() {
        let controller = JobController::new();
        controller.pause();
        controller.stop();

        assert_eq!(controller.state(), ControlState::Stopped);
        assert!(controller.is_gate_open());
        assert!(controller.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_open() {
        let controller = JobController::new();
        assert!(controller.wait_while_paused().await);
    }

    #[tokio::test]
    async fn test_wait_blocks_until_resume() {
        let controller = Arc::new(JobController::new());
        controller.pause();

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.wait_while_paused().await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        controller.resume();
        let proceed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(proceed);
    }

    #[tokio::test]
    async fn test_stop_wakes_paused_waiter() {
        let controller = Arc::new(JobController::new());
        controller.pause();

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.wait_while_paused().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.stop();

        let proceed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!proceed);
    }
}
