//! Wake/status probing
//!
//! A probe is a single call to the orchestrator that both starts a dormant
//! service (if it is not already starting) and reports its current state.

use crate::error::ProbeError;
use crate::service::ServiceDescriptor;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Status token meaning the service accepts traffic
pub const STATUS_STARTED: &str = "started";
/// Status token meaning the service is waking up
pub const STATUS_STARTING: &str = "starting";

/// Upper bound for the per-call timeout when none is configured
const MAX_DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one wake/status call
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    Ready,
    NotReady,
    Error(ProbeError),
}

impl ProbeStatus {
    /// Classify the text returned by the orchestrator
    pub fn from_body(body: &str) -> Self {
        match body.trim() {
            STATUS_STARTED => ProbeStatus::Ready,
            STATUS_STARTING => ProbeStatus::NotReady,
            _ => ProbeStatus::Error(ProbeError::UnexpectedStatus(body.to_string())),
        }
    }
}

/// Issues wake/status calls for a service
#[async_trait]
pub trait StatusProber: Send + Sync {
    async fn probe(&self, service: &ServiceDescriptor) -> ProbeStatus;
}

/// Per-call timeout used when a gate does not configure one:
/// the group timeout, capped at ten seconds.
pub fn default_probe_timeout(group_timeout: Duration) -> Duration {
    group_timeout.min(MAX_DEFAULT_PROBE_TIMEOUT)
}

/// Probes the orchestrator over HTTP
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    /// Create a prober whose calls each give up after `timeout`
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, url: &str) -> Result<String, ProbeError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        response.text().await.map_err(|e| self.classify_transport(e))
    }

    fn classify_transport(&self, err: reqwest::Error) -> ProbeError {
        if err.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl StatusProber for HttpProber {
    async fn probe(&self, service: &ServiceDescriptor) -> ProbeStatus {
        debug!(service = service.name(), url = service.wake_url(), "Sending wake request");

        // reqwest's timeout covers the body too, the outer bound guards DNS stalls
        let result = match tokio::time::timeout(self.timeout, self.fetch(service.wake_url())).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        };

        let status = match result {
            Ok(body) => ProbeStatus::from_body(&body),
            Err(e) => ProbeStatus::Error(e),
        };

        debug!(service = service.name(), status = ?status, "Wake request answered");
        status
    }
}
