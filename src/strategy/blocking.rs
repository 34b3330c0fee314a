use super::{evaluate, BlockingSpec, GroupSpec, GroupStatus, PassReport};
use crate::duration;
use crate::error::{html_error_response, GateErrorCode};
use crate::forward::Forwarder;
use crate::pages::PageRenderer;
use crate::probe::StatusProber;
use crate::GateBody;
use hyper::{Request, Response};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Waits on the server: holds the request and polls until the group is ready,
/// a probe fails, or the blocking delay is exhausted
pub struct BlockingStrategy {
    group: GroupSpec,
    spec: BlockingSpec,
    prober: Arc<dyn StatusProber>,
    pages: Arc<PageRenderer>,
}

impl BlockingStrategy {
    pub fn new(
        group: GroupSpec,
        spec: BlockingSpec,
        prober: Arc<dyn StatusProber>,
        pages: Arc<PageRenderer>,
    ) -> Self {
        Self {
            group,
            spec,
            prober,
            pages,
        }
    }

    pub fn group(&self) -> &GroupSpec {
        &self.group
    }

    pub fn spec(&self) -> BlockingSpec {
        self.spec
    }

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
        let started = Instant::now();
        let deadline = started + self.spec.block_delay();

        // First tick completes immediately, later ones every check_interval
        let mut ticker = tokio::time::interval(self.spec.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u32 = 0;
        let mut last_pending: Vec<String> =
            self.group.services.iter().map(|s| s.name().to_string()).collect();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(started, ticks),
                _ = ticker.tick() => {}
            }
            ticks += 1;

            // A pass still in flight at the deadline is abandoned
            let report: PassReport = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(started, ticks),
                report = evaluate(&self.group, self.prober.as_ref()) => report,
                _ = tokio::time::sleep_until(deadline) => {
                    return self.timed_out(ticks, &last_pending);
                }
            };

            match &report.status {
                GroupStatus::Failed { service, error } => {
                    error!(
                        group = %self.group.name,
                        service = %service,
                        status = %error.detail(),
                        ticks,
                        "Failed to wake services"
                    );
                    return html_error_response(
                        GateErrorCode::WakeFailed,
                        self.pages.render_error(&self.group.name, &error.detail()),
                    );
                }
                GroupStatus::Ready => {
                    info!(
                        group = %self.group.name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        ticks,
                        "All services ready, forwarding"
                    );
                    return next.forward(req).await;
                }
                GroupStatus::NotReady => {
                    debug!(
                        group = %self.group.name,
                        pending = ?report.pending(),
                        ticks,
                        "Services still starting"
                    );
                }
            }

            last_pending = report.pending().into_iter().map(str::to_string).collect();
            if Instant::now() >= deadline {
                return self.timed_out(ticks, &last_pending);
            }
        }
    }

    fn timed_out(&self, ticks: u32, pending: &[String]) -> Response<GateBody> {
        let pending = pending.join(", ");
        warn!(
            group = %self.group.name,
            pending = %pending,
            block_delay_ms = self.spec.block_delay().as_millis() as u64,
            ticks,
            "Timed out waiting for services"
        );
        let message = format!(
            "Timed out after {} waiting for services to start: {}",
            duration::humanize(self.spec.block_delay()),
            pending
        );
        html_error_response(
            GateErrorCode::WakeTimeout,
            self.pages.render_error(&self.group.name, &message),
        )
    }

    fn cancelled(&self, started: Instant, ticks: u32) -> Response<GateBody> {
        info!(
            group = %self.group.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ticks,
            "Wait cancelled"
        );
        html_error_response(
            GateErrorCode::WaitCancelled,
            self.pages
                .render_error(&self.group.name, "Request cancelled while waiting for services"),
        )
    }
}
