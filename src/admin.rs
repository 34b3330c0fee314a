use crate::duration;
use crate::pool::PoolStats;
use crate::server::{Gate, GateTable};
use crate::strategy::WaitMode;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Version information for the gate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// Internal status API, bound to localhost
pub struct AdminServer {
    bind_addr: SocketAddr,
    gates: Arc<GateTable>,
    pool_stats: Arc<PoolStats>,
    shutdown_rx: watch::Receiver<bool>,
}

impl AdminServer {
    pub fn new(
        bind_addr: SocketAddr,
        gates: Arc<GateTable>,
        pool_stats: Arc<PoolStats>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            gates,
            pool_stats,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "Admin API server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let gates = Arc::clone(&self.gates);
                            let pool_stats = Arc::clone(&self.pool_stats);

                            tokio::spawn(async move {
                                if let Err(e) = serve_admin_connection(stream, gates, pool_stats).await {
                                    debug!(addr = %addr, error = %e, "Admin connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept admin connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Admin server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_admin_connection<S>(
    stream: S,
    gates: Arc<GateTable>,
    pool_stats: Arc<PoolStats>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let gates = Arc::clone(&gates);
        let pool_stats = Arc::clone(&pool_stats);
        async move { handle_admin_request(req, gates, pool_stats).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Admin connection error: {}", e))?;

    Ok(())
}

fn gate_summary(gate: &Gate) -> serde_json::Value {
    let settings = gate.settings();
    let services: Vec<&str> = settings.group.services.iter().map(|s| s.name()).collect();

    let mut summary = serde_json::json!({
        "host": settings.host,
        "group": settings.group.name,
        "mode": settings.mode.as_str(),
        "timeout": duration::wire_format(settings.group.timeout),
        "upstream": settings.upstream.to_string(),
        "services": services,
    });

    if let WaitMode::Blocking(spec) = settings.mode {
        summary["blockdelay"] = duration::wire_format(spec.block_delay()).into();
        summary["block_check_interval"] = duration::wire_format(spec.check_interval()).into();
    }

    summary
}

async fn handle_admin_request<B>(
    req: Request<B>,
    gates: Arc<GateTable>,
    pool_stats: Arc<PoolStats>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    let method = req.method();

    debug!(%method, %path, "Admin API request");

    let response = match (method, path) {
        (&Method::GET, "/health") => response(StatusCode::OK, "ok"),

        (&Method::GET, "/version") => {
            let version_info = serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            });
            json_response(StatusCode::OK, version_info.to_string())
        }

        // Configured gates, sorted by host
        (&Method::GET, "/gates") => {
            let gate_list: Vec<serde_json::Value> =
                gates.sorted().into_iter().map(gate_summary).collect();
            let response_body = serde_json::json!({
                "gates": gate_list,
                "count": gate_list.len(),
                "pool": {
                    "total_requests": pool_stats.get_total_requests(),
                    "failed_requests": pool_stats.get_failed_requests(),
                },
            });
            json_response(StatusCode::OK, response_body.to_string())
        }

        _ => response(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}
