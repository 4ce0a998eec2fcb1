//! Application state.

use vfetch_queue::ProgressHub;
use vfetch_worker::JobRunner;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub runner: JobRunner,
}

impl AppState {
    pub fn new(config: ApiConfig, runner: JobRunner) -> Self {
        Self { config, runner }
    }

    /// Registry of job channels.
    pub fn hub(&self) -> &ProgressHub {
        self.runner.hub()
    }
}
