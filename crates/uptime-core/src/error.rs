use thiserror::Error;

use crate::model::TargetId;

/// Rejected registration input. Never reaches the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("URL must use http or https, got '{scheme}' in {url}")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("Interval {interval_secs}s is below the minimum of {min_secs}s")]
    IntervalTooShort { interval_secs: u64, min_secs: u64 },
    #[error("Interval {interval_secs}s exceeds the maximum of {max_secs}s")]
    IntervalTooLong { interval_secs: u64, max_secs: u64 },
    #[error("Name must not be empty")]
    EmptyName,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Target {0} not found")]
    NotFound(TargetId),
    #[error("{0}")]
    Conflict(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("pool_size must be at least 1")]
    PoolSize,
    #[error("min_interval must be at least 1s")]
    MinInterval,
    #[error("default_interval ({default_secs}s) must not be below min_interval ({min_secs}s)")]
    DefaultInterval { default_secs: u64, min_secs: u64 },
    #[error("{0} must not exceed {max}s", max = crate::model::MAX_INTERVAL_SECS)]
    IntervalCeiling(&'static str),
    #[error("probe_timeout must be greater than zero")]
    ProbeTimeout,
    #[error("redirect_cap {0} exceeds the maximum of {max}", max = crate::config::MAX_REDIRECT_CAP)]
    RedirectCap(usize),
    #[error("reconcile_interval must be greater than zero")]
    ReconcileInterval,
    #[error("reconcile_backoff must be non-zero and not exceed reconcile_backoff_max")]
    ReconcileBackoff,
    #[error("history_limit must be at least 1")]
    HistoryLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Dispatch pool is shut down")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("Scheduler is not running")]
    Stopped,
    #[error("Reconciliation failed: {0}")]
    Reconcile(StoreError),
}
