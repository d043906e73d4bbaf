use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::MAX_INTERVAL_SECS;

/// Hard ceiling for `redirect_cap`; longer chains are treated as a misconfiguration.
pub const MAX_REDIRECT_CAP: usize = 20;

/// Configuration for the scheduler, dispatch pool and prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of probes running at once (default: 16).
    pub pool_size: usize,
    /// Shortest accepted check interval (default: 1s).
    pub min_interval: Duration,
    /// Interval applied when a registration does not specify one (default: 60s).
    pub default_interval: Duration,
    /// Per-probe deadline, enforced by the prober (default: 5s).
    pub probe_timeout: Duration,
    /// Redirects followed before a probe counts as failed (default: 5).
    pub redirect_cap: usize,
    /// Safety-net resync with the target store (default: 30s).
    pub reconcile_interval: Duration,
    /// Base retry delay after a failed reconcile, doubled per consecutive failure.
    pub reconcile_backoff: Duration,
    pub reconcile_backoff_max: Duration,
    /// Results retained per target by the in-memory store.
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            min_interval: Duration::from_secs(1),
            default_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            redirect_cap: 5,
            reconcile_interval: Duration::from_secs(30),
            reconcile_backoff: Duration::from_secs(1),
            reconcile_backoff_max: Duration::from_secs(60),
            history_limit: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_min_interval(mut self, secs: u64) -> Self {
        self.min_interval = Duration::from_secs(secs);
        self
    }

    pub fn with_default_interval(mut self, secs: u64) -> Self {
        self.default_interval = Duration::from_secs(secs);
        self
    }

    pub fn with_probe_timeout(mut self, ms: u64) -> Self {
        self.probe_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_redirect_cap(mut self, cap: usize) -> Self {
        self.redirect_cap = cap;
        self
    }

    pub fn with_reconcile_interval(mut self, secs: u64) -> Self {
        self.reconcile_interval = Duration::from_secs(secs);
        self
    }

    pub fn with_reconcile_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.reconcile_backoff = Duration::from_millis(base_ms);
        self.reconcile_backoff_max = Duration::from_millis(max_ms);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Rejects values the engine cannot run with. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::PoolSize);
        }
        if self.min_interval < Duration::from_secs(1) {
            return Err(ConfigError::MinInterval);
        }
        if self.default_interval < self.min_interval {
            return Err(ConfigError::DefaultInterval {
                default_secs: self.default_interval.as_secs(),
                min_secs: self.min_interval.as_secs(),
            });
        }
        let ceiling = Duration::from_secs(MAX_INTERVAL_SECS);
        if self.min_interval > ceiling {
            return Err(ConfigError::IntervalCeiling("min_interval"));
        }
        if self.default_interval > ceiling {
            return Err(ConfigError::IntervalCeiling("default_interval"));
        }
        if self.reconcile_interval > ceiling {
            return Err(ConfigError::IntervalCeiling("reconcile_interval"));
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::ProbeTimeout);
        }
        if self.redirect_cap > MAX_REDIRECT_CAP {
            return Err(ConfigError::RedirectCap(self.redirect_cap));
        }
        if self.reconcile_interval.is_zero() {
            return Err(ConfigError::ReconcileInterval);
        }
        if self.reconcile_backoff.is_zero() || self.reconcile_backoff > self.reconcile_backoff_max {
            return Err(ConfigError::ReconcileBackoff);
        }
        if self.history_limit == 0 {
            return Err(ConfigError::HistoryLimit);
        }
        Ok(())
    }
}
