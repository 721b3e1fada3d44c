use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{Engine, ProgressTracker};

/// Everything the daemon's front ends (remote control, CLI) share.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub engine: Engine,
    pub progress: ProgressTracker,
}

impl AppContext {
    /// Wire a progress tracker into the engine so remote `status` queries see
    /// every snapshot.
    pub fn new(config: AppConfig, engine: Engine) -> Self {
        let progress = ProgressTracker::new();
        engine.add_observer(Arc::new(progress.clone()));

        Self {
            config: Arc::new(config),
            engine,
            progress,
        }
    }
}
