//! MCP Router
//!
//! A protocol-aware gateway in front of a fleet of tool servers.
//!
//! # Architecture Overview
//!
//! ```text
//!     Caller ──▶ http (axum) ──▶ routing engine ──▶ load balancer ──▶ connection cache ──▶ Backend
//!                  │  ▲               │   ▲                                  │
//!                  │  └── sessions ◀──┘   └──── health engine + circuit ◀────┘
//!                  │
//!                  └── /sse push sessions
//!
//!     Cross-cutting: config (+ hot reload), registry watcher, events, metrics, lifecycle
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use mcp_router::config::{load_config, watcher::ConfigWatcher};
use mcp_router::lifecycle::signals;
use mcp_router::observability::{logging, metrics};
use mcp_router::{Gateway, RouterConfig, Shutdown};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "mcp-router")]
#[command(about = "Routing gateway for MCP tool servers", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };

    logging::init_logging(&config.observability.log_level)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mcp-router starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.listener.request_timeout_secs,
        config_file = ?cli.config,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let mut gateway = Gateway::from_config(config);
    let tasks = gateway.spawn_background();
    signals::spawn_signal_handler(gateway.shutdown.clone());

    // Keep the notify watcher alive for the lifetime of the server.
    let _config_watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let engine = gateway.engine.clone();
            let mut shutdown = gateway.shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = updates.recv() => match update {
                            Some(next) => engine.apply_config(&next),
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            });
            match watcher.run() {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload unavailable");
                    None
                }
            }
        }
        None => None,
    };

    gateway
        .http_server()
        .run(listener, gateway.shutdown.subscribe())
        .await?;

    gateway.shutdown().await;
    let stopped = Shutdown::drain(tasks, SHUTDOWN_GRACE).await;
    tracing::info!(stopped, "Shutdown complete");
    Ok(())
}
