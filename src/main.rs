//! WebSocket reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                  WEBSOCKET PROXY                      │
//!                    │                                                       │
//!   Client upgrade   │  ┌─────────┐   ┌─────────┐   ┌──────────────────┐    │
//!   ─────────────────┼─▶│  http   │──▶│ routing │──▶│  proxy: resolve  │────┼──▶ Backend
//!                    │  │ server  │   │ (prefix)│   │  headers, dial   │    │    (ws/wss)
//!                    │  └─────────┘   └─────────┘   └────────┬─────────┘    │
//!                    │                                       │ 101          │
//!   Client frames    │                               ┌───────▼──────────┐   │
//!   ◀────────────────┼──────────────────────────────▶│   proxy: relay   │◀──┼──▶ Backend frames
//!                    │                               └──────────────────┘   │
//!                    │                                                       │
//!                    │  config · observability · lifecycle · admin API       │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use websocket_proxy::admin::{run_admin, AdminState};
use websocket_proxy::config::load_config;
use websocket_proxy::observability::{logging, metrics};
use websocket_proxy::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "websocket-proxy")]
#[command(about = "WebSocket reverse proxy", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "websocket-proxy.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", cli.config.display(), e);
            std::process::exit(2);
        }
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    if let Err(e) = logging::init_logging(level, config.observability.log_file.as_deref()) {
        eprintln!("log file: {}", e);
        std::process::exit(2);
    }

    tracing::info!("websocket-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        proxies = config.proxies.len(),
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

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let admin = config.admin.clone();
    let routes = config.proxies.iter().map(|p| p.name.clone()).collect();
    let server = HttpServer::new(config);

    if admin.enabled {
        let admin_listener = TcpListener::bind(&admin.bind_address).await?;
        let state = AdminState::new(server.registry(), &admin.api_key, routes);
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = run_admin(admin_listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
