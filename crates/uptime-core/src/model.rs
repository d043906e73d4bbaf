use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Stable identifier of a monitored target. Survives restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(Uuid);

impl TargetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TargetId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for TargetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    #[default]
    Unknown,
    Up,
    Down,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Success,
    Failure,
    Timeout,
}

impl CheckOutcome {
    /// Status a target takes after a check with this outcome.
    pub fn status(self) -> TargetStatus {
        match self {
            Self::Success => TargetStatus::Up,
            Self::Failure | Self::Timeout => TargetStatus::Down,
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// A URL under periodic health checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub id: TargetId,
    pub name: String,
    pub url: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub current_status: TargetStatus,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MonitoredTarget {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Input for registering a new target. Validated before it reaches a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTarget {
    pub name: Option<String>,
    pub url: String,
    pub interval_secs: u64,
}

impl NewTarget {
    pub fn new(url: impl Into<String>, interval_secs: u64) -> Self {
        Self {
            name: None,
            url: url.into(),
            interval_secs,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Checks URL and interval and fills in a display name from the host when absent.
    pub fn validate(mut self, min_interval: Duration) -> Result<Self, ValidationError> {
        let host = validate_url(&self.url)?;
        validate_interval(self.interval_secs, min_interval)?;
        self.name = match self.name.take() {
            Some(name) if name.trim().is_empty() => return Err(ValidationError::EmptyName),
            Some(name) => Some(name.trim().to_string()),
            None => Some(host),
        };
        Ok(self)
    }

    pub fn into_target(self) -> MonitoredTarget {
        MonitoredTarget {
            id: TargetId::new(),
            name: self.name.unwrap_or_else(|| self.url.clone()),
            url: self.url,
            interval_secs: self.interval_secs,
            current_status: TargetStatus::Unknown,
            last_checked_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Partial update of a registered target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub interval_secs: Option<u64>,
}

impl TargetPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.url.is_none() && self.interval_secs.is_none()
    }

    pub fn validate(self, min_interval: Duration) -> Result<Self, ValidationError> {
        if let Some(ref url) = self.url {
            validate_url(url)?;
        }
        if let Some(secs) = self.interval_secs {
            validate_interval(secs, min_interval)?;
        }
        if let Some(ref name) = self.name {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyName);
            }
        }
        Ok(self)
    }

    pub fn apply(&self, target: &mut MonitoredTarget) {
        if let Some(ref name) = self.name {
            target.name = name.trim().to_string();
        }
        if let Some(ref url) = self.url {
            target.url = url.clone();
        }
        if let Some(secs) = self.interval_secs {
            target.interval_secs = secs;
        }
    }
}

/// Outcome of one probe. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: Uuid,
    pub target_id: TargetId,
    pub observed_at: DateTime<Utc>,
    pub outcome: CheckOutcome,
    /// Milliseconds to response headers; only set for `Success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    pub fn latency(&self) -> Option<Duration> {
        self.latency_ms
            .map(|ms| Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}

/// Returns the host of a valid absolute http(s) URL.
pub fn validate_url(raw: &str) -> Result<String, ValidationError> {
    let parsed = url::Url::parse(raw).map_err(|e| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::UnsupportedScheme {
            url: raw.to_string(),
            scheme: parsed.scheme().to_string(),
        });
    }
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".into(),
        })
}

/// Longest accepted check interval (30 days).
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

pub fn validate_interval(secs: u64, min_interval: Duration) -> Result<(), ValidationError> {
    if Duration::from_secs(secs) < min_interval || secs == 0 {
        return Err(ValidationError::IntervalTooShort {
            interval_secs: secs,
            min_secs: min_interval.as_secs().max(1),
        });
    }
    if secs > MAX_INTERVAL_SECS {
        return Err(ValidationError::IntervalTooLong {
            interval_secs: secs,
            max_secs: MAX_INTERVAL_SECS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_status() {
        assert_eq!(CheckOutcome::Success.status(), TargetStatus::Up);
        assert_eq!(CheckOutcome::Failure.status(), TargetStatus::Down);
        assert_eq!(CheckOutcome::Timeout.status(), TargetStatus::Down);
    }

    #[test]
    fn new_target_defaults_name_to_host() {
        let t = NewTarget::new("https://example.com/health", 30)
            .validate(Duration::from_secs(1))
            .unwrap();
        assert_eq!(t.name.as_deref(), Some("example.com"));
        let target = t.into_target();
        assert_eq!(target.current_status, TargetStatus::Unknown);
        assert!(target.last_checked_at.is_none());
        assert_eq!(target.interval(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = NewTarget::new("ftp://example.com/", 30)
            .validate(Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedScheme { .. }));
    }

    #[test]
    fn rejects_relative_url() {
        let err = NewTarget::new("/health", 30)
            .validate(Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUrl { .. }));
    }

    #[test]
    fn rejects_interval_below_minimum() {
        let err = NewTarget::new("http://ok.test", 4)
            .validate(Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, ValidationError::IntervalTooShort { interval_secs: 4, min_secs: 5 }));

        let err = NewTarget::new("http://ok.test", 0)
            .validate(Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ValidationError::IntervalTooShort { .. }));
    }

    #[test]
    fn rejects_interval_above_maximum() {
        let err = NewTarget::new("http://ok.test", u64::MAX)
            .validate(Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ValidationError::IntervalTooLong { max_secs: MAX_INTERVAL_SECS, .. }));

        let patch = TargetPatch {
            interval_secs: Some(MAX_INTERVAL_SECS + 1),
            ..Default::default()
        };
        assert!(matches!(
            patch.validate(Duration::from_secs(1)),
            Err(ValidationError::IntervalTooLong { .. })
        ));

        NewTarget::new("http://ok.test", MAX_INTERVAL_SECS)
            .validate(Duration::from_secs(1))
            .unwrap();
    }

    #[test]
    fn patch_applies_only_given_fields() {
        let mut target = NewTarget::new("http://ok.test", 10).into_target();
        let patch = TargetPatch {
            interval_secs: Some(2),
            ..Default::default()
        };
        patch.apply(&mut target);
        assert_eq!(target.interval_secs, 2);
        assert_eq!(target.url, "http://ok.test");
    }

    #[test]
    fn target_id_round_trips_through_display() {
        let id = TargetId::new();
        let parsed: TargetId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn latency_is_derived_from_millis() {
        let result = CheckResult {
            id: Uuid::new_v4(),
            target_id: TargetId::new(),
            observed_at: Utc::now(),
            outcome: CheckOutcome::Success,
            latency_ms: Some(250.0),
            status_code: Some(200),
            detail: None,
        };
        assert_eq!(result.latency(), Some(Duration::from_millis(250)));
    }
}
