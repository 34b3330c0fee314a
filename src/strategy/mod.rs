//! Request gating strategies
//!
//! A strategy decides, for one inbound request, whether the gate's services
//! are ready (forward), still waking (hold or ask the client to retry) or
//! broken (error page). Two strategies exist:
//!
//! - [`DynamicStrategy`] probes once and answers `202 Accepted` with a
//!   self-refreshing loading page until every service is up.
//! - [`BlockingStrategy`] keeps the request open and polls until the services
//!   are up, a probe fails, or the blocking delay runs out.
//!
//! Neither keeps readiness between requests: every evaluation pass probes
//! every service again and produces a fresh [`PassReport`].

mod blocking;
mod dynamic;

pub use blocking::BlockingStrategy;
pub use dynamic::DynamicStrategy;

use crate::config::GateSettings;
use crate::error::ProbeError;
use crate::forward::Forwarder;
use crate::pages::PageRenderer;
use crate::probe::{ProbeStatus, StatusProber};
use crate::service::ServiceDescriptor;
use crate::GateBody;
use hyper::{Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// The set of services gated together
#[derive(Debug, Clone)]
pub struct GroupSpec {
    /// Label shown on pages and in logs
    pub name: String,
    /// Inactivity timeout sent to the orchestrator
    pub timeout: Duration,
    /// Services in declaration order
    pub services: Vec<ServiceDescriptor>,
}

/// Waiting policy of the blocking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingSpec {
    block_delay: Duration,
    check_interval: Duration,
}

impl BlockingSpec {
    /// `None` when `check_interval` is zero
    pub fn new(block_delay: Duration, check_interval: Duration) -> Option<Self> {
        if check_interval.is_zero() {
            return None;
        }
        Some(Self {
            block_delay,
            check_interval,
        })
    }

    /// Maximum total wait
    pub fn block_delay(&self) -> Duration {
        self.block_delay
    }

    /// Poll cadence, never zero
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }
}

/// How a gate waits for its services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Wait in the browser: loading page that refreshes itself
    Dynamic,
    /// Wait on the server, holding the request
    Blocking(BlockingSpec),
}

impl WaitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitMode::Dynamic => "dynamic",
            WaitMode::Blocking(_) => "blocking",
        }
    }
}

/// Aggregated readiness of a group after one pass
#[derive(Debug, Clone, PartialEq)]
pub enum GroupStatus {
    Ready,
    NotReady,
    Failed { service: String, error: ProbeError },
}

/// Outcomes of one evaluation pass, in probe order
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub outcomes: Vec<(String, ProbeStatus)>,
    pub status: GroupStatus,
}

impl PassReport {
    /// Names of the services that are still waking up
    pub fn pending(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, status)| *status == ProbeStatus::NotReady)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Probe every service of the group in order and AND the results together.
///
/// Stops at the first error: services after it are not probed.
pub async fn evaluate(group: &GroupSpec, prober: &dyn StatusProber) -> PassReport {
    let mut outcomes = Vec::with_capacity(group.services.len());
    let mut all_ready = true;

    for service in &group.services {
        let status = prober.probe(service).await;

        let failure = match &status {
            ProbeStatus::Ready => None,
            ProbeStatus::NotReady => {
                all_ready = false;
                None
            }
            ProbeStatus::Error(error) => Some(error.clone()),
        };

        outcomes.push((service.name().to_string(), status));

        if let Some(error) = failure {
            warn!(
                group = %group.name,
                service = service.name(),
                error = %error,
                "Wake request failed"
            );
            return PassReport {
                outcomes,
                status: GroupStatus::Failed {
                    service: service.name().to_string(),
                    error,
                },
            };
        }
    }

    let status = if all_ready {
        GroupStatus::Ready
    } else {
        GroupStatus::NotReady
    };

    PassReport { outcomes, status }
}

/// A gate's strategy, selected once at setup time
pub enum Strategy {
    Dynamic(DynamicStrategy),
    Blocking(BlockingStrategy),
}

impl Strategy {
    /// Build the strategy a validated gate asks for
    pub fn from_settings(
        settings: &GateSettings,
        prober: Arc<dyn StatusProber>,
        pages: Arc<PageRenderer>,
    ) -> Self {
        match settings.mode {
            WaitMode::Dynamic => {
                Strategy::Dynamic(DynamicStrategy::new(settings.group.clone(), prober, pages))
            }
            WaitMode::Blocking(spec) => Strategy::Blocking(BlockingStrategy::new(
                settings.group.clone(),
                spec,
                prober,
                pages,
            )),
        }
    }

    pub fn group(&self) -> &GroupSpec {
        match self {
            Strategy::Dynamic(s) => s.group(),
            Strategy::Blocking(s) => s.group(),
        }
    }

    /// Handle one inbound request. `cancel` only matters to the blocking
    /// strategy, which is the only one that waits.
    pub async fn handle<B, F>(
        &self,
        req: Request<B>,
        next: &F,
        cancel: &CancellationToken,
    ) -> Response<GateBody>
    where
        B: Send + 'static,
        F: Forwarder<B> + ?Sized,
    {
        match self {
            Strategy::Dynamic(s) => s.handle(req, next).await,
            Strategy::Blocking(s) => s.handle(req, next, cancel).await,
        }
    }
}
