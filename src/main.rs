//! Dubbo bridge gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     HTTP client                                              Dubbo provider
//!         │                                                          ▲
//!         ▼                                                          │
//!   ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────────┐│
//!   │   http   │──▶│ routing  │──▶│    bridge    │──▶│   upstream   │┘
//!   │  server  │   │  table   │   │ JSON↔Hessian │   │ adapter/tcp  │
//!   └──────────┘   └──────────┘   └──────────────┘   └──────────────┘
//!
//!   cross-cutting: config (+ watcher), observability, lifecycle
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use dubbo_bridge::config::{load_config, ConfigWatcher, GatewayConfig};
use dubbo_bridge::http::{spawn_reloader, HttpServer};
use dubbo_bridge::lifecycle::{signals, Shutdown};
use dubbo_bridge::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "dubbo-bridge")]
#[command(about = "HTTP/JSON gateway for Dubbo services", long_about = None)]
struct Cli {
    /// TOML configuration file. Watched for changes when given.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dubbo-bridge starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(&config)?;

    // Kept alive for the lifetime of the server.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            spawn_reloader(server.routes(), updates);
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::listen(shutdown.clone());
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
