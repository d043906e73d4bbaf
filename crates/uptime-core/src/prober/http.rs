use std::error::Error as _;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{redirect, Client};
use tracing::debug;

use super::{ProbeError, ProbeReport, Prober};
use crate::config::SchedulerConfig;

const USER_AGENT: &str = concat!("uptime-monitor/", env!("CARGO_PKG_VERSION"));

/// HTTP GET prober with connection pooling, a capped redirect chain and a hard deadline.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    timeout: Duration,
    redirect_cap: usize,
}

impl HttpProber {
    pub fn new(timeout: Duration, redirect_cap: usize) -> Result<Self, reqwest::Error> {
        let client = Self::build_client(timeout, redirect_cap)?;
        Ok(Self::with_client(client, timeout, redirect_cap))
    }

    /// The client must already carry the matching redirect policy.
    pub fn with_client(client: Client, timeout: Duration, redirect_cap: usize) -> Self {
        Self {
            client,
            timeout,
            redirect_cap,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.probe_timeout, config.redirect_cap)
    }

    pub fn build_client(timeout: Duration, redirect_cap: usize) -> Result<Client, reqwest::Error> {
        Client::builder()
            .connect_timeout(timeout)
            .redirect(redirect::Policy::limited(redirect_cap))
            .pool_max_idle_per_host(4)
            .user_agent(USER_AGENT)
            .build()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, url: &str) -> Result<(Duration, u16), ProbeError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let start = Instant::now();
        // Resolves once headers arrive; the body is never read.
        let sent = tokio::time::timeout(self.timeout, self.client.get(parsed).send()).await;
        let latency = start.elapsed();

        let response = match sent {
            Err(_) => return Err(self.timeout_error(url)),
            Ok(Err(e)) => return Err(self.classify(url, e)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_success() {
            Ok((latency, status.as_u16()))
        } else {
            Err(ProbeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }

    fn timeout_error(&self, url: &str) -> ProbeError {
        ProbeError::Timeout {
            url: url.to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            return self.timeout_error(url);
        }
        if e.is_redirect() {
            return ProbeError::TooManyRedirects {
                url: url.to_string(),
                cap: self.redirect_cap,
            };
        }
        let reason = match e.source() {
            Some(source) => format!("{}: {}", e, source),
            None => e.to_string(),
        };
        ProbeError::Transport {
            url: url.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeReport {
        let result = self.check(url).await;
        if let Err(ref e) = result {
            debug!(url, error = %e, "Probe did not succeed");
        }
        ProbeReport::from(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CheckOutcome;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober(timeout_ms: u64) -> HttpProber {
        HttpProber::new(Duration::from_millis(timeout_ms), 5).unwrap()
    }

    #[tokio::test]
    async fn probe_succeeds_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let report = prober(2000).probe(&format!("{}/health", server.uri())).await;
        assert_eq!(report.outcome, CheckOutcome::Success);
        assert_eq!(report.status_code, Some(200));
        assert!(report.latency.unwrap() > Duration::ZERO);
        assert!(report.detail.is_none());
    }

    #[tokio::test]
    async fn probe_fails_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let report = prober(2000).probe(&format!("{}/broken", server.uri())).await;
        assert_eq!(report.outcome, CheckOutcome::Failure);
        assert_eq!(report.status_code, Some(503));
        assert!(report.latency.is_none());
    }

    #[tokio::test]
    async fn probe_fails_on_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let report = prober(2000).probe(&format!("{}/missing", server.uri())).await;
        assert_eq!(report.outcome, CheckOutcome::Failure);
        assert_eq!(report.status_code, Some(404));
    }

    #[tokio::test]
    async fn probe_times_out_on_slow_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
            .mount(&server)
            .await;

        let started = Instant::now();
        let report = prober(200).probe(&format!("{}/slow", server.uri())).await;
        assert_eq!(report.outcome, CheckOutcome::Timeout);
        assert!(report.latency.is_none());
        assert!(started.elapsed() < Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn probe_follows_short_redirect_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let report = prober(2000).probe(&format!("{}/old", server.uri())).await;
        assert_eq!(report.outcome, CheckOutcome::Success);
        assert_eq!(report.status_code, Some(204));
    }

    #[tokio::test]
    async fn probe_fails_on_redirect_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            .mount(&server)
            .await;

        let report = prober(2000).probe(&format!("{}/loop", server.uri())).await;
        assert_eq!(report.outcome, CheckOutcome::Failure);
        assert!(report.detail.unwrap().contains("redirects"));
    }

    #[tokio::test]
    async fn probe_fails_on_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let report = prober(2000).probe(&format!("http://{}/", addr)).await;
        assert_eq!(report.outcome, CheckOutcome::Failure);
        assert!(report.status_code.is_none());
    }

    #[tokio::test]
    async fn probe_rejects_unparseable_url() {
        let report = prober(2000).probe("not a url").await;
        assert_eq!(report.outcome, CheckOutcome::Failure);
        assert!(report.detail.unwrap().contains("Invalid URL"));
    }
}
