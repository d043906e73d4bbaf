//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [scheduler]
//! pool_size = 32
//! probe_timeout_ms = 5000
//! reconcile_interval_secs = 30
//!
//! [store]
//! path = "/var/lib/uptime-monitor/store.json"
//! history_limit = 500
//!
//! [[target]]
//! name = "Homepage"
//! url = "https://example.com/"
//! interval_secs = 30
//!
//! [[target]]
//! url = "https://api.example.com/health"
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use uptime_core::model::{validate_interval, validate_url};
use uptime_core::{NewTarget, SchedulerConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub target: Vec<TargetDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

pub fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Every key is optional; unset keys keep the `SchedulerConfig` default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerSection {
    pub pool_size: Option<usize>,
    pub min_interval_secs: Option<u64>,
    pub default_interval_secs: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub redirect_cap: Option<usize>,
    pub reconcile_interval_secs: Option<u64>,
    pub reconcile_backoff_ms: Option<u64>,
    pub reconcile_backoff_max_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// JSON file the store is loaded from and written to. In-memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: None,
            history_limit: default_history_limit(),
        }
    }
}

fn default_history_limit() -> usize {
    SchedulerConfig::default().history_limit
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetDef {
    pub name: Option<String>,
    pub url: String,
    pub interval_secs: Option<u64>,
}

impl TargetDef {
    pub fn to_new_target(&self, config: &SchedulerConfig) -> NewTarget {
        let interval = self
            .interval_secs
            .unwrap_or(config.default_interval.as_secs());
        let target = NewTarget::new(self.url.clone(), interval);
        match self.name {
            Some(ref name) => target.with_name(name.clone()),
            None => target,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let s = &self.scheduler;
        let mut c = SchedulerConfig::default().with_history_limit(self.store.history_limit);
        if let Some(v) = s.pool_size {
            c = c.with_pool_size(v);
        }
        if let Some(v) = s.min_interval_secs {
            c = c.with_min_interval(v);
        }
        if let Some(v) = s.default_interval_secs {
            c = c.with_default_interval(v);
        }
        if let Some(v) = s.probe_timeout_ms {
            c = c.with_probe_timeout(v);
        }
        if let Some(v) = s.redirect_cap {
            c = c.with_redirect_cap(v);
        }
        if let Some(v) = s.reconcile_interval_secs {
            c = c.with_reconcile_interval(v);
        }
        if s.reconcile_backoff_ms.is_some() || s.reconcile_backoff_max_ms.is_some() {
            let base = s
                .reconcile_backoff_ms
                .unwrap_or(c.reconcile_backoff.as_millis() as u64);
            let max = s
                .reconcile_backoff_max_ms
                .unwrap_or(c.reconcile_backoff_max.as_millis() as u64);
            c = c.with_reconcile_backoff(base, max);
        }
        c
    }

    fn validate(&self) -> Result<(), String> {
        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        let scheduler = self.scheduler_config();
        scheduler
            .validate()
            .map_err(|e| format!("Invalid [scheduler] settings: {}", e))?;

        let mut urls = HashSet::new();
        for (i, t) in self.target.iter().enumerate() {
            validate_url(&t.url)
                .map_err(|e| format!("Invalid target URL at index {}: {}", i, e))?;
            let interval = t
                .interval_secs
                .unwrap_or(scheduler.default_interval.as_secs());
            validate_interval(interval, scheduler.min_interval)
                .map_err(|e| format!("Invalid interval for target {}: {}", t.url, e))?;
            if t.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                return Err(format!("Target {} has an empty name", t.url));
            }
            if !urls.insert(t.url.as_str()) {
                return Err(format!("Duplicate target URL: {}", t.url));
            }
        }

        Ok(())
    }
}

/// Probe timeout used by `watch` when `--timeout` is not given.
pub fn default_probe_timeout() -> Duration {
    SchedulerConfig::default().probe_timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[[target]]
url = "https://example.com/"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.target.len(), 1);
        assert_eq!(config.server.log_format, "pretty");
        assert_eq!(config.server.listen.port(), 8080);
        assert!(config.store.path.is_none());
        assert_eq!(config.store.history_limit, 500);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler, SchedulerConfig::default());
        let new = config.target[0].to_new_target(&scheduler);
        assert_eq!(new.interval_secs, 60);
        assert!(new.name.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:9090"
log_format = "json"

[scheduler]
pool_size = 4
min_interval_secs = 10
default_interval_secs = 120
probe_timeout_ms = 2500
redirect_cap = 3
reconcile_interval_secs = 15
reconcile_backoff_ms = 500
reconcile_backoff_max_ms = 8000

[store]
path = "/tmp/uptime.json"
history_limit = 50

[[target]]
name = "Homepage"
url = "https://example.com/"
interval_secs = 30

[[target]]
url = "http://api.example.com/health"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.server.log_format, "json");
        assert_eq!(config.store.path.as_deref(), Some(Path::new("/tmp/uptime.json")));

        let s = config.scheduler_config();
        assert_eq!(s.pool_size, 4);
        assert_eq!(s.min_interval, Duration::from_secs(10));
        assert_eq!(s.default_interval, Duration::from_secs(120));
        assert_eq!(s.probe_timeout, Duration::from_millis(2500));
        assert_eq!(s.redirect_cap, 3);
        assert_eq!(s.reconcile_interval, Duration::from_secs(15));
        assert_eq!(s.reconcile_backoff, Duration::from_millis(500));
        assert_eq!(s.reconcile_backoff_max, Duration::from_millis(8000));
        assert_eq!(s.history_limit, 50);

        let first = config.target[0].to_new_target(&s);
        assert_eq!(first.name.as_deref(), Some("Homepage"));
        assert_eq!(first.interval_secs, 30);
        let second = config.target[1].to_new_target(&s);
        assert_eq!(second.interval_secs, 120); // from default_interval_secs
    }

    #[test]
    fn validate_rejects_duplicate_target_urls() {
        let toml = r#"
[[target]]
url = "https://example.com/"

[[target]]
url = "https://example.com/"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate target URL"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_url() {
        let toml = r#"
[[target]]
url = "not-a-url"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid target URL"), "{}", err);
    }

    #[test]
    fn validate_rejects_non_http_scheme() {
        let toml = r#"
[[target]]
url = "ftp://files.example.com/"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("http or https"), "{}", err);
    }

    #[test]
    fn validate_rejects_interval_below_minimum() {
        let toml = r#"
[scheduler]
min_interval_secs = 30

[[target]]
url = "https://example.com/"
interval_secs = 5
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("below the minimum"), "{}", err);
    }

    #[test]
    fn validate_rejects_bad_scheduler_settings() {
        let toml = r#"
[scheduler]
pool_size = 0
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("pool_size"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[server]
log_format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }
}
