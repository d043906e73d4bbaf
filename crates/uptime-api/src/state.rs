use std::sync::Arc;

use chrono::{DateTime, Utc};

use uptime_core::{Repository, SchedulerConfig, SchedulerHandle};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub scheduler: SchedulerHandle,
    pub config: SchedulerConfig,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, scheduler: SchedulerHandle, config: SchedulerConfig) -> Self {
        Self {
            repo,
            scheduler,
            config,
            started_at: Utc::now(),
        }
    }
}
