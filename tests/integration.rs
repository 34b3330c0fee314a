//! Integration tests for Wakegate

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use wakegate::admin::AdminServer;
use wakegate::config::Config;
use wakegate::pool::{ConnectionPool, PoolConfig};
use wakegate::server::{GateServer, GateTable};

/// Wake calls seen by a mock orchestrator, by service name
type Calls = Arc<Mutex<Vec<String>>>;

/// Wait for a port to become available (server listening)
async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Read a request head, up to the blank line
async fn read_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn write_response(stream: &mut TcpStream, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Query parameter value from a request line such as `GET /?name=web&timeout=1m0s HTTP/1.1`
fn query_param(head: &str, key: &str) -> Option<String> {
    let target = head.lines().next()?.split(' ').nth(1)?;
    let query = target.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}

/// Start an orchestrator that answers each service with its scripted bodies;
/// the last body of a script repeats
async fn spawn_orchestrator(port: u16, scripts: &[(&str, &[&str])]) -> Calls {
    let scripts: HashMap<String, VecDeque<String>> = scripts
        .iter()
        .map(|(name, bodies)| {
            (
                name.to_string(),
                bodies.iter().map(|b| b.to_string()).collect(),
            )
        })
        .collect();
    let scripts = Arc::new(Mutex::new(scripts));
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));

    let listener = TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .unwrap();
    let recorded = Arc::clone(&calls);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let scripts = Arc::clone(&scripts);
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let head = read_head(&mut stream).await;
                let name = query_param(&head, "name").unwrap_or_default();
                recorded.lock().unwrap().push(name.clone());

                let body = {
                    let mut scripts = scripts.lock().unwrap();
                    match scripts.get_mut(&name) {
                        Some(script) if script.len() > 1 => script.pop_front().unwrap(),
                        Some(script) => script.front().cloned().unwrap(),
                        None => format!("no such service: {}", name),
                    }
                };
                write_response(&mut stream, &body).await;
            });
        }
    });

    calls
}

/// Start an upstream that answers with the request head it received
async fn spawn_upstream(port: u16) {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let head = read_head(&mut stream).await;
                let body = format!("upstream saw:\n{}", head.to_lowercase());
                write_response(&mut stream, &body).await;
            });
        }
    });
}

/// Start the gate and admin servers for the given config
async fn start_gate(toml: &str) -> (u16, u16, watch::Sender<bool>) {
    let config: Config = toml::from_str(toml).unwrap();
    config.validate().unwrap();

    let settings = config.resolve_gates().unwrap();
    let pool = Arc::new(ConnectionPool::new(PoolConfig::default()));
    let gates = Arc::new(GateTable::from_settings(
        settings,
        reqwest::Client::new(),
        Arc::clone(&pool),
        config.server.request_timeout(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let gate_port = config.server.port;
    let admin_port = config.server.admin_port;

    let gate_addr: SocketAddr = format!("127.0.0.1:{}", gate_port).parse().unwrap();
    let gate_server = GateServer::new(gate_addr, Arc::clone(&gates), shutdown_rx.clone());
    tokio::spawn(async move {
        let _ = gate_server.run().await;
    });

    let admin_addr: SocketAddr = format!("127.0.0.1:{}", admin_port).parse().unwrap();
    let admin_server = AdminServer::new(admin_addr, gates, pool.stats(), shutdown_rx);
    tokio::spawn(async move {
        let _ = admin_server.run().await;
    });

    assert!(wait_for_port(gate_port, Duration::from_secs(2)).await);
    assert!(wait_for_port(admin_port, Duration::from_secs(2)).await);

    (gate_port, admin_port, shutdown_tx)
}

fn gate_config(gate_port: u16, admin_port: u16, orchestrator: u16, gates: &str) -> String {
    format!(
        r#"
[server]
port = {}
admin_port = {}
bind = "127.0.0.1"

[defaults]
serviceurl = "http://127.0.0.1:{}/"
timeout = "1m"
{}
"#,
        gate_port, admin_port, orchestrator, gates
    )
}

/// Send HTTP request with custom Host header
async fn http_get_with_host(
    port: u16,
    path: &str,
    host: &str,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

/// Send a simple HTTP request and get response
async fn http_get(
    port: u16,
    path: &str,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    http_get_with_host(port, path, &format!("127.0.0.1:{}", port)).await
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}

// ============================================================================
// Dynamic mode
// ============================================================================

#[tokio::test]
async fn test_dynamic_gate_loading_page_then_forward() {
    let (gate_port, admin_port, orchestrator, upstream) = (31010, 31011, 31012, 31013);

    let calls = spawn_orchestrator(orchestrator, &[("whoami", &["starting", "started"])]).await;
    spawn_upstream(upstream).await;

    let gates = format!(
        r#"
[gates."app.local"]
group = "demo"
name = "whoami"
upstream = "http://127.0.0.1:{}"
"#,
        upstream
    );
    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, &gates)).await;

    // Still starting: loading page that refreshes itself
    let response = http_get_with_host(gate_port, "/hello?x=1", "app.local")
        .await
        .unwrap();
    assert!(status_line(&response).contains("202"), "Response: {}", response);
    assert!(response.contains("demo"), "Response: {}", response);
    assert!(response.contains("http-equiv=\"refresh\""), "Response: {}", response);
    assert!(!response.contains("upstream saw"));

    // Started: forwarded to the upstream with path and query intact
    let response = http_get_with_host(gate_port, "/hello?x=1", "app.local")
        .await
        .unwrap();
    assert!(status_line(&response).contains("200"), "Response: {}", response);
    assert!(response.contains("get /hello?x=1 http/1.1"), "Response: {}", response);

    assert_eq!(*calls.lock().unwrap(), vec!["whoami", "whoami"]);

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_unknown_status_returns_error_page() {
    let (gate_port, admin_port, orchestrator, upstream) = (31020, 31021, 31022, 31023);

    let calls = spawn_orchestrator(
        orchestrator,
        &[
            ("web", &["quota exceeded"]),
            ("db", &["started"]),
        ],
    )
    .await;
    spawn_upstream(upstream).await;

    let gates = format!(
        r#"
[gates."stack.local"]
names = ["web", "db"]
upstream = "http://127.0.0.1:{}"
"#,
        upstream
    );
    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, &gates)).await;

    let response = http_get_with_host(gate_port, "/", "stack.local")
        .await
        .unwrap();
    assert!(status_line(&response).contains("500"), "Response: {}", response);
    assert!(response.to_lowercase().contains("x-gate-error: wake_failed"));
    assert!(response.contains("quota exceeded"));
    assert!(!response.contains("upstream saw"));

    // The failing service stops the pass
    assert_eq!(*calls.lock().unwrap(), vec!["web"]);

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_forwarding_headers_reach_upstream() {
    let (gate_port, admin_port, orchestrator, upstream) = (31030, 31031, 31032, 31033);

    spawn_orchestrator(orchestrator, &[("whoami", &["started\n"])]).await;
    spawn_upstream(upstream).await;

    let gates = format!(
        r#"
[gates."app.local"]
name = "whoami"
upstream = "http://127.0.0.1:{}"
"#,
        upstream
    );
    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, &gates)).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", gate_port))
        .await
        .unwrap();
    let request = "GET /page HTTP/1.1\r\nHost: App.Local:8080\r\nX-Request-Id: trace-42\r\nX-Forwarded-For: 6.6.6.6\r\nConnection: close\r\n\r\n";
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(status_line(&response).contains("200"), "Response: {}", response);
    assert!(response.contains("x-request-id: trace-42"), "Response: {}", response);
    assert!(response.contains("x-forwarded-for: 127.0.0.1"), "Response: {}", response);
    assert!(!response.contains("6.6.6.6"));
    assert!(response.contains("x-forwarded-host: app.local:8080"), "Response: {}", response);
    assert!(response.contains("x-forwarded-proto: http"), "Response: {}", response);

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_upstream_down_returns_bad_gateway() {
    let (gate_port, admin_port, orchestrator, upstream) = (31040, 31041, 31042, 31043);

    spawn_orchestrator(orchestrator, &[("whoami", &["started"])]).await;

    // Nothing listens on the upstream port
    let gates = format!(
        r#"
[gates."app.local"]
name = "whoami"
upstream = "http://127.0.0.1:{}"
"#,
        upstream
    );
    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, &gates)).await;

    let response = http_get_with_host(gate_port, "/", "app.local")
        .await
        .unwrap();
    assert!(status_line(&response).contains("502"), "Response: {}", response);
    assert!(response.contains("\"code\":\"CONNECTION_FAILED\""));

    let _ = shutdown_tx.send(true);
}

// ============================================================================
// Blocking mode
// ============================================================================

#[tokio::test]
async fn test_blocking_gate_holds_request_until_started() {
    let (gate_port, admin_port, orchestrator, upstream) = (31050, 31051, 31052, 31053);

    let calls = spawn_orchestrator(
        orchestrator,
        &[("whoami", &["starting", "starting", "started"])],
    )
    .await;
    spawn_upstream(upstream).await;

    let gates = format!(
        r#"
[gates."app.local"]
name = "whoami"
upstream = "http://127.0.0.1:{}"
waitui = false
blockdelay = "10s"
block_check_interval = "100ms"
"#,
        upstream
    );
    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, &gates)).await;

    let start = std::time::Instant::now();
    let response = http_get_with_host(gate_port, "/", "app.local")
        .await
        .unwrap();

    assert!(status_line(&response).contains("200"), "Response: {}", response);
    assert!(response.contains("upstream saw"));
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(calls.lock().unwrap().len(), 3);

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_blocking_gate_times_out() {
    let (gate_port, admin_port, orchestrator, upstream) = (31060, 31061, 31062, 31063);

    spawn_orchestrator(orchestrator, &[("whoami", &["starting"])]).await;
    spawn_upstream(upstream).await;

    let gates = format!(
        r#"
[gates."app.local"]
group = "slow-stack"
name = "whoami"
upstream = "http://127.0.0.1:{}"
waitui = false
blockdelay = "300ms"
block_check_interval = "100ms"
"#,
        upstream
    );
    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, &gates)).await;

    let response = http_get_with_host(gate_port, "/", "app.local")
        .await
        .unwrap();

    assert!(status_line(&response).contains("504"), "Response: {}", response);
    assert!(response.to_lowercase().contains("x-gate-error: wake_timeout"));
    assert!(response.contains("slow-stack"));
    assert!(!response.contains("upstream saw"));

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_shutdown_cancels_blocked_requests() {
    let (gate_port, admin_port, orchestrator, upstream) = (31070, 31071, 31072, 31073);

    spawn_orchestrator(orchestrator, &[("whoami", &["starting"])]).await;
    spawn_upstream(upstream).await;

    let gates = format!(
        r#"
[gates."app.local"]
name = "whoami"
upstream = "http://127.0.0.1:{}"
waitui = false
blockdelay = "1m"
block_check_interval = "100ms"
"#,
        upstream
    );
    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, &gates)).await;

    let waiter = tokio::spawn(async move { http_get_with_host(gate_port, "/", "app.local").await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    let _ = shutdown_tx.send(true);

    let response = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("blocked request finishes after shutdown")
        .unwrap()
        .unwrap();

    assert!(status_line(&response).contains("503"), "Response: {}", response);
    assert!(response.to_lowercase().contains("x-gate-error: wait_cancelled"));
}

#[tokio::test]
async fn test_client_disconnect_stops_blocked_wait() {
    let (gate_port, admin_port, orchestrator, upstream) = (31110, 31111, 31112, 31113);

    let calls = spawn_orchestrator(orchestrator, &[("whoami", &["starting"])]).await;
    spawn_upstream(upstream).await;

    let gates = format!(
        r#"
[gates."app.local"]
name = "whoami"
upstream = "http://127.0.0.1:{}"
waitui = false
blockdelay = "1m"
block_check_interval = "100ms"
"#,
        upstream
    );
    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, &gates)).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", gate_port))
        .await
        .unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: app.local\r\n\r\n")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    drop(stream);

    // Let any pass already in flight settle
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after_disconnect = calls.lock().unwrap().len();
    assert!(after_disconnect > 0, "wait never reached the orchestrator");

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.lock().unwrap().len(), after_disconnect);

    let _ = shutdown_tx.send(true);
}

// ============================================================================
// Routing errors
// ============================================================================

#[tokio::test]
async fn test_unknown_host_returns_404() {
    let (gate_port, admin_port, orchestrator) = (31080, 31081, 31082);

    let calls = spawn_orchestrator(orchestrator, &[("whoami", &["started"])]).await;

    let gates = r#"
[gates."app.local"]
name = "whoami"
upstream = "http://127.0.0.1:31083"
"#;
    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, gates)).await;

    let response = http_get_with_host(gate_port, "/", "unknown.host")
        .await
        .unwrap();
    assert!(status_line(&response).contains("404"), "Response: {}", response);
    assert!(response.contains("\"code\":\"UNKNOWN_HOST\""));
    assert!(calls.lock().unwrap().is_empty());

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_missing_host_header_returns_400() {
    let (gate_port, admin_port, orchestrator) = (31090, 31091, 31092);

    spawn_orchestrator(orchestrator, &[]).await;

    let (gate_port, _, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, "")).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", gate_port))
        .await
        .unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(status_line(&response).contains("400"), "Response: {}", response);
    assert!(response.to_lowercase().contains("x-gate-error: missing_host_header"));

    let _ = shutdown_tx.send(true);
}

// ============================================================================
// Admin API
// ============================================================================

#[tokio::test]
async fn test_admin_endpoints() {
    let (gate_port, admin_port, orchestrator) = (31100, 31101, 31102);

    spawn_orchestrator(orchestrator, &[]).await;

    let gates = r#"
[gates."app.local"]
name = "whoami"
upstream = "http://127.0.0.1:31103"

[gates."stack.local"]
group = "stack"
names = ["web", "db"]
upstream = "http://127.0.0.1:31104"
waitui = false
"#;
    let (_, admin_port, shutdown_tx) =
        start_gate(&gate_config(gate_port, admin_port, orchestrator, gates)).await;

    let response = http_get(admin_port, "/health").await.unwrap();
    assert!(status_line(&response).contains("200"));
    assert!(response.ends_with("ok"));

    let response = http_get(admin_port, "/version").await.unwrap();
    assert!(response.contains("\"name\":\"wakegate\""), "Response: {}", response);

    let response = http_get(admin_port, "/gates").await.unwrap();
    assert!(status_line(&response).contains("200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["count"], 2);
    assert_eq!(json["gates"][0]["host"], "app.local");
    assert_eq!(json["gates"][0]["mode"], "dynamic");
    assert_eq!(json["gates"][1]["group"], "stack");
    assert_eq!(json["gates"][1]["mode"], "blocking");
    assert_eq!(json["gates"][1]["services"], serde_json::json!(["web", "db"]));

    let response = http_get(admin_port, "/nope").await.unwrap();
    assert!(status_line(&response).contains("404"));

    let _ = shutdown_tx.send(true);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_invalid_config_is_rejected_before_serving() {
    let toml = r#"
[defaults]
serviceurl = "http://ondemand:10000"

[gates."app.local"]
upstream = "http://127.0.0.1:3000"
waitui = false
block_check_interval = "0s"
names = ["web"]
"#;
    let config: Config = toml::from_str(toml).unwrap();
    let err = config.validate().unwrap_err().to_string();
    assert!(err.starts_with("Configuration errors:"), "{}", err);
    assert!(err.contains("block_check_interval"), "{}", err);
}
