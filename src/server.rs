//! Host-routed HTTP server in front of the gates

use crate::config::GateSettings;
use crate::error::{json_error_response, GateErrorCode};
use crate::forward::UpstreamForwarder;
use crate::pages::PageRenderer;
use crate::pool::ConnectionPool;
use crate::probe::{HttpProber, StatusProber};
use crate::strategy::Strategy;
use crate::GateBody;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Maximum hostname length per DNS specification
const MAX_HOSTNAME_LEN: usize = 253;

/// One virtual host: its settings, its strategy and where ready requests go
pub struct Gate {
    settings: GateSettings,
    strategy: Strategy,
    forwarder: UpstreamForwarder,
}

impl Gate {
    pub fn new(
        settings: GateSettings,
        prober: Arc<dyn StatusProber>,
        pages: Arc<PageRenderer>,
        pool: Arc<ConnectionPool>,
        request_timeout: Duration,
    ) -> Self {
        let strategy = Strategy::from_settings(&settings, prober, pages);
        let forwarder = UpstreamForwarder::new(pool, settings.upstream.clone(), request_timeout);
        Self {
            settings,
            strategy,
            forwarder,
        }
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    pub fn host(&self) -> &str {
        &self.settings.host
    }

    pub async fn handle(&self, req: Request<Incoming>, cancel: &CancellationToken) -> Response<GateBody> {
        self.strategy.handle(req, &self.forwarder, cancel).await
    }
}

/// Gates indexed by lowercase host
#[derive(Default)]
pub struct GateTable {
    gates: HashMap<String, Gate>,
}

impl GateTable {
    pub fn new(gates: Vec<Gate>) -> Self {
        let gates = gates
            .into_iter()
            .map(|gate| (gate.host().to_lowercase(), gate))
            .collect();
        Self { gates }
    }

    /// Build every gate with an HTTP prober and its own page renderer.
    ///
    /// All gates share the wake client and the upstream pool.
    pub fn from_settings(
        settings: Vec<GateSettings>,
        client: reqwest::Client,
        pool: Arc<ConnectionPool>,
        request_timeout: Duration,
    ) -> Self {
        let gates = settings
            .into_iter()
            .map(|settings| {
                let prober = Arc::new(HttpProber::new(client.clone(), settings.probe_timeout));
                let pages = Arc::new(PageRenderer::new(
                    settings.loading_page.as_deref(),
                    settings.error_page.as_deref(),
                ));
                info!(
                    host = %settings.host,
                    group = %settings.group.name,
                    mode = settings.mode.as_str(),
                    services = settings.group.services.len(),
                    upstream = %settings.upstream,
                    "Gate configured"
                );
                Gate::new(settings, prober, pages, Arc::clone(&pool), request_timeout)
            })
            .collect();
        Self::new(gates)
    }

    pub fn get(&self, hostname: &str) -> Option<&Gate> {
        self.gates.get(hostname)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Gates sorted by host
    pub fn sorted(&self) -> Vec<&Gate> {
        let mut gates: Vec<&Gate> = self.gates.values().collect();
        gates.sort_by(|a, b| a.host().cmp(b.host()));
        gates
    }
}

/// The public gate server
pub struct GateServer {
    bind_addr: SocketAddr,
    gates: Arc<GateTable>,
    shutdown_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl GateServer {
    pub fn new(
        bind_addr: SocketAddr,
        gates: Arc<GateTable>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            gates,
            shutdown_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Root token; every waiting request holds a child of it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(
            addr = %self.bind_addr,
            gates = self.gates.len(),
            "Gate server listening (HTTP/1.1 and HTTP/2)"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let gates = Arc::clone(&self.gates);
                            let cancel = self.cancel.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, gates, cancel).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Gate server shutting down");
                        self.cancel.cancel();
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    gates: Arc<GateTable>,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let gates = Arc::clone(&gates);
        let cancel = cancel.child_token();
        async move { handle_request(req, gates, addr, cancel).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    mut req: Request<Incoming>,
    gates: Arc<GateTable>,
    client_addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<Response<GateBody>, hyper::Error> {
    // Generate or propagate request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let hostname = match extract_hostname(&req) {
        Some(h) => h,
        None => {
            return Ok(json_error_response(
                GateErrorCode::MissingHostHeader,
                "Missing or invalid Host header",
            ));
        }
    };

    let Some(gate) = gates.get(&hostname) else {
        debug!(hostname, request_id, "No gate for host");
        return Ok(json_error_response(
            GateErrorCode::UnknownHost,
            "Unknown or unconfigured host",
        ));
    };

    // Overwrite rather than append: the gate is the first trusted hop
    set_forwarding_headers(&mut req, &request_id, client_addr);

    debug!(
        hostname,
        group = %gate.settings().group.name,
        method = %req.method(),
        uri = %req.uri(),
        request_id,
        "Incoming request"
    );

    Ok(gate.handle(req, &cancel).await)
}

fn set_forwarding_headers<B>(req: &mut Request<B>, request_id: &str, client_addr: SocketAddr) {
    let headers = req.headers_mut();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = headers.get(hyper::header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }

    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
}

fn extract_hostname<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())
        .and_then(|h| {
            // Strip port if present
            let hostname = h.split(':').next()?;

            if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
                return None;
            }

            // Alphanumeric, hyphen and dot only
            if !hostname
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            {
                return None;
            }

            Some(hostname.to_lowercase())
        })
}
