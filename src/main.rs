use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use wakegate::admin::{AdminServer, PKG_NAME, VERSION};
use wakegate::config::Config;
use wakegate::pool::{ConnectionPool, PoolConfig};
use wakegate::server::{GateServer, GateTable};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wakegate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");

    print_startup_banner(&config);

    let settings = config.resolve_gates()?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool_config = PoolConfig {
        max_idle_per_host: config.server.pool_max_idle_per_host,
        idle_timeout: config.server.pool_idle_timeout(),
    };
    let pool = Arc::new(ConnectionPool::new(pool_config));

    // One wake client for every gate; timeouts are applied per call
    let client = reqwest::Client::builder()
        .user_agent(format!("{}/{}", PKG_NAME, VERSION))
        .build()?;

    let gates = Arc::new(GateTable::from_settings(
        settings,
        client,
        Arc::clone(&pool),
        config.server.request_timeout(),
    ));

    let gate_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let gate_server = GateServer::new(gate_addr, Arc::clone(&gates), shutdown_rx.clone());
    let gate_handle = tokio::spawn(async move {
        if let Err(e) = gate_server.run().await {
            error!(error = %e, "Gate server error");
        }
    });

    // Admin server is always bound to localhost
    let admin_addr: SocketAddr = format!("127.0.0.1:{}", config.server.admin_port)
        .parse()
        .map_err(|e| {
            error!(admin_port = config.server.admin_port, error = %e, "Invalid admin bind address");
            anyhow::anyhow!("Invalid admin bind address: {}", e)
        })?;

    let admin_server = AdminServer::new(admin_addr, gates, pool.stats(), shutdown_rx);
    let admin_handle = tokio::spawn(async move {
        if let Err(e) = admin_server.run().await {
            error!(error = %e, "Admin server error");
        }
    });

    wait_for_signal().await?;

    // Signal shutdown; blocked waits are cancelled by the gate server
    let _ = shutdown_tx.send(true);

    // Wait for servers to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = gate_handle.await;
        let _ = admin_handle.await;
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting gate");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        admin_port = config.server.admin_port,
        request_timeout_secs = config.server.request_timeout_secs,
        "Server configuration"
    );
    info!(
        pool_max_idle = config.server.pool_max_idle_per_host,
        pool_idle_timeout_secs = config.server.pool_idle_timeout_secs,
        "Connection pool settings"
    );
    info!(
        serviceurl = ?config.defaults.serviceurl,
        timeout = %config.defaults.timeout,
        waitui = config.defaults.waitui,
        blockdelay = %config.defaults.blockdelay,
        block_check_interval = %config.defaults.block_check_interval,
        "Gate defaults"
    );

    let mut hosts: Vec<&String> = config.gates.keys().collect();
    hosts.sort();
    info!(gate_count = hosts.len(), gates = ?hosts, "Configured gates");
}
