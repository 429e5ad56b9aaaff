//! fleet-gateway
//!
//! Single HTTP entry point in front of the upstream fleet.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────┐
//!                      │                 FLEET GATEWAY                  │
//!   Client Request     │  ┌─────────┐    ┌──────────┐    ┌───────────┐ │
//!   ───────────────────┼─▶│  http   │───▶│ routing  │───▶│   relay   │─┼──▶ Upstream
//!                      │  │ server  │    │ registry │    │ forwarder │ │    services
//!                      │  └─────────┘    └──────────┘    │ streaming │ │
//!   Client Response    │       ▲                         └─────┬─────┘ │
//!   ◀──────────────────┼───────┴───────────────────────────────┘       │
//!                      │                                               │
//!                      │  GET /health → health aggregator (fan-out)    │
//!                      │  config · resilience · observability · lifecycle
//!                      └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use fleet_gateway::config::load_config;
use fleet_gateway::http::GatewayServer;
use fleet_gateway::lifecycle::{signals, Shutdown};
use fleet_gateway::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "fleet-gateway", version, about = "HTTP gateway for the service fleet")]
struct Cli {
    /// Path to a TOML config file; built-in defaults apply without one.
    #[arg(short, long, env = "FLEET_GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fleet-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        standard_timeout_secs = config.timeouts.standard_secs,
        inference_timeout_secs = config.timeouts.inference_secs,
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
    let server = GatewayServer::new(config)?;

    let shutdown = Shutdown::new();
    let listener_handle = shutdown.subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_stop().await;
        trigger.trigger();
    });

    server.run(listener, listener_handle).await?;
    shutdown.complete();

    tracing::info!("Shutdown complete");
    Ok(())
}
