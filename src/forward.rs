//! Forwarding of requests that are allowed through the gate

use crate::error::{json_error_response, GateErrorCode};
use crate::pool::ConnectionPool;
use crate::GateBody;
use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::{Request, Response, Uri};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Downstream handler invoked once a gate's services are ready
#[async_trait]
pub trait Forwarder<B>: Send + Sync
where
    B: Send + 'static,
{
    async fn forward(&self, req: Request<B>) -> Response<GateBody>;
}

/// Proxies requests to a gate's upstream through the shared connection pool
pub struct UpstreamForwarder {
    pool: Arc<ConnectionPool>,
    upstream: Uri,
    request_timeout: Duration,
}

impl UpstreamForwarder {
    pub fn new(pool: Arc<ConnectionPool>, upstream: Uri, request_timeout: Duration) -> Self {
        Self {
            pool,
            upstream,
            request_timeout,
        }
    }

    pub fn upstream(&self) -> &Uri {
        &self.upstream
    }
}

#[async_trait]
impl Forwarder<Incoming> for UpstreamForwarder {
    async fn forward(&self, req: Request<Incoming>) -> Response<GateBody> {
        let result = tokio::time::timeout(
            self.request_timeout,
            self.pool.send_request(req, &self.upstream),
        )
        .await;

        match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                // Log detailed error internally, return generic message externally
                error!(upstream = %self.upstream, error = %e, "Failed to forward request");
                json_error_response(GateErrorCode::ConnectionFailed, "Failed to connect to upstream")
            }
            Err(_) => {
                warn!(
                    upstream = %self.upstream,
                    timeout_secs = self.request_timeout.as_secs(),
                    "Upstream request timed out"
                );
                json_error_response(
                    GateErrorCode::RequestTimeout,
                    format!(
                        "Request timed out after {} seconds",
                        self.request_timeout.as_secs()
                    ),
                )
            }
        }
    }
}
