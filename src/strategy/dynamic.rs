use super::{evaluate, GroupSpec, GroupStatus};
use crate::error::{html_error_response, html_response, GateErrorCode};
use crate::forward::Forwarder;
use crate::pages::PageRenderer;
use crate::probe::StatusProber;
use crate::GateBody;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, error};

/// Waits in the browser: one probe pass per request, loading page until ready
pub struct DynamicStrategy {
    group: GroupSpec,
    prober: Arc<dyn StatusProber>,
    pages: Arc<PageRenderer>,
}

impl DynamicStrategy {
    pub fn new(group: GroupSpec, prober: Arc<dyn StatusProber>, pages: Arc<PageRenderer>) -> Self {
        Self {
            group,
            prober,
            pages,
        }
    }

    pub fn group(&self) -> &GroupSpec {
        &self.group
    }

    pub async fn handle<B, F>(&self, req: Request<B>, next: &F) -> Response<GateBody>
    where
        B: Send + 'static,
        F: Forwarder<B> + ?Sized,
    {
        let report = evaluate(&self.group, self.prober.as_ref()).await;

        match &report.status {
            GroupStatus::Ready => {
                debug!(group = %self.group.name, "All services ready, forwarding");
                next.forward(req).await
            }
            GroupStatus::NotReady => {
                debug!(
                    group = %self.group.name,
                    pending = ?report.pending(),
                    "Services still starting"
                );
                html_response(
                    StatusCode::ACCEPTED,
                    None,
                    self.pages.render_loading(&self.group.name, self.group.timeout),
                )
            }
            GroupStatus::Failed { service, error } => {
                error!(
                    group = %self.group.name,
                    service = %service,
                    status = %error.detail(),
                    "Failed to wake services"
                );
                html_error_response(
                    GateErrorCode::WakeFailed,
                    self.pages.render_error(&self.group.name, &error.detail()),
                )
            }
        }
    }
}
