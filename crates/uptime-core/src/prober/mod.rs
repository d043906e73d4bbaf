mod http;

pub use http::HttpProber;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::CheckOutcome;

/// Why a probe did not succeed. Always folded into a [`CheckOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("Connection error for {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("No response from {url} within {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("More than {cap} redirects from {url}")]
    TooManyRedirects { url: String, cap: usize },
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ProbeError {
    pub fn outcome(&self) -> CheckOutcome {
        match self {
            Self::Timeout { .. } => CheckOutcome::Timeout,
            _ => CheckOutcome::Failure,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// What one probe observed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub outcome: CheckOutcome,
    /// Request start to response headers. Only set for `Success`.
    pub latency: Option<Duration>,
    pub status_code: Option<u16>,
    pub detail: Option<String>,
}

impl ProbeReport {
    pub fn success(latency: Duration, status_code: u16) -> Self {
        Self {
            outcome: CheckOutcome::Success,
            latency: Some(latency),
            status_code: Some(status_code),
            detail: None,
        }
    }

    pub fn from_error(error: &ProbeError) -> Self {
        Self {
            outcome: error.outcome(),
            latency: None,
            status_code: error.status_code(),
            detail: Some(error.to_string()),
        }
    }
}

impl From<Result<(Duration, u16), ProbeError>> for ProbeReport {
    fn from(result: Result<(Duration, u16), ProbeError>) -> Self {
        match result {
            Ok((latency, status)) => Self::success(latency, status),
            Err(e) => Self::from_error(&e),
        }
    }
}

/// Performs one health check against one URL.
///
/// Implementations enforce their own deadline; callers never wrap a probe in
/// an extra timeout. The trait is object-safe and Send + Sync so one prober
/// can be shared by every worker in the dispatch pool.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeReport;
}
