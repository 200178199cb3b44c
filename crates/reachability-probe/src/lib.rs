//! Best-effort internet reachability probe.
//!
//! The probe issues a short-timeout request to a well-known endpoint and falls
//! back to the next endpoint when it fails. Any HTTP response counts as
//! reachable. The result is advisory: callers log it and carry on.

use async_trait::async_trait;
use onboard_config_and_utils::Config;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single endpoint check failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("{endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("{endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("failed to build probe client: {0}")]
    Client(String),
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Outcome of a probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reachability {
    pub reachable: bool,
    /// Endpoint that answered, if any.
    pub endpoint: Option<String>,
    pub latency: Option<Duration>,
    /// Failures of the endpoints tried before (or instead of) the answer.
    pub failures: Vec<ProbeError>,
}

impl Reachability {
    pub fn reachable_via(endpoint: impl Into<String>, latency: Duration) -> Self {
        Self {
            reachable: true,
            endpoint: Some(endpoint.into()),
            latency: Some(latency),
            failures: Vec::new(),
        }
    }

    pub fn unreachable(failures: Vec<ProbeError>) -> Self {
        Self {
            reachable: false,
            endpoint: None,
            latency: None,
            failures,
        }
    }
}

/// Anything that can report reachability.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> Reachability;
}

/// HTTP probe over an ordered endpoint list.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    endpoints: Vec<String>,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> ProbeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoints,
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> ProbeResult<Self> {
        Self::new(
            config.probe_endpoints.clone(),
            Duration::from_millis(config.probe_timeout_ms),
        )
    }

    async fn check(&self, endpoint: &str) -> ProbeResult<Duration> {
        let started = Instant::now();
        // The client timeout already bounds the request; the outer timeout
        // also covers slow body-less responses.
        let request = self.client.get(endpoint).send();

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(_response)) => Ok(started.elapsed()),
            Ok(Err(e)) if e.is_timeout() => Err(self.timeout_error(endpoint)),
            Ok(Err(e)) => Err(ProbeError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(self.timeout_error(endpoint)),
        }
    }

    fn timeout_error(&self, endpoint: &str) -> ProbeError {
        ProbeError::Timeout {
            endpoint: endpoint.to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self) -> Reachability {
        let mut failures = Vec::new();

        for endpoint in &self.endpoints {
            match self.check(endpoint).await {
                Ok(latency) => {
                    debug!(
                        endpoint = %endpoint,
                        latency_ms = latency.as_millis() as u64,
                        "network reachable"
                    );
                    let mut result = Reachability::reachable_via(endpoint.clone(), latency);
                    result.failures = failures;
                    return result;
                }
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "reachability endpoint failed");
                    failures.push(e);
                }
            }
        }

        warn!(attempted = failures.len(), "network appears unreachable");
        Reachability::unreachable(failures)
    }
}

/// Probe with a fixed answer, for `--no-probe` runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    reachable: bool,
}

impl FixedProbe {
    pub fn reachable() -> Self {
        Self { reachable: true }
    }

    pub fn unreachable() -> Self {
        Self { reachable: false }
    }
}

#[async_trait]
impl Probe for FixedProbe {
    async fn probe(&self) -> Reachability {
        if self.reachable {
            Reachability::reachable_via("fixed", Duration::ZERO)
        } else {
            Reachability::unreachable(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `count` connections with an empty 204 response.
    async fn serve_no_content(count: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..count {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });
        format!("http://{}/ping", addr)
    }

    /// Accept connections but never answer.
    async fn serve_silence() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            }
        });
        format!("http://{}/slow", addr)
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/closed", addr)
    }

    #[tokio::test]
    async fn test_first_endpoint_answers() {
        let ok = serve_no_content(1).await;
        let probe = HttpProbe::new(vec![ok.clone()], Duration::from_secs(2)).unwrap();

        let result = probe.probe().await;
        assert!(result.reachable);
        assert_eq!(result.endpoint.as_deref(), Some(ok.as_str()));
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_second_endpoint() {
        let closed = closed_port_url();
        let ok = serve_no_content(1).await;
        let probe = HttpProbe::new(vec![closed, ok.clone()], Duration::from_secs(2)).unwrap();

        let result = probe.probe().await;
        assert!(result.reachable);
        assert_eq!(result.endpoint.as_deref(), Some(ok.as_str()));
        assert_eq!(result.failures.len(), 1);
        assert!(matches!(result.failures[0], ProbeError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let slow = serve_silence().await;
        let probe = HttpProbe::new(vec![slow], Duration::from_millis(200)).unwrap();

        let result = probe.probe().await;
        assert!(!result.reachable);
        assert!(matches!(result.failures[0], ProbeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_all_endpoints_down() {
        let probe = HttpProbe::new(
            vec![closed_port_url(), closed_port_url()],
            Duration::from_secs(1),
        )
        .unwrap();

        let result = probe.probe().await;
        assert!(!result.reachable);
        assert_eq!(result.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_fixed_probe() {
        assert!(FixedProbe::reachable().probe().await.reachable);
        assert!(!FixedProbe::unreachable().probe().await.reachable);
    }

    #[test]
    fn test_from_config_uses_configured_timeout() {
        let config = Config {
            probe_timeout_ms: 1_234,
            ..Config::default()
        };
        let probe = HttpProbe::from_config(&config).unwrap();
        assert_eq!(probe.timeout, Duration::from_millis(1_234));
        assert_eq!(probe.endpoints.len(), 2);
    }
}
