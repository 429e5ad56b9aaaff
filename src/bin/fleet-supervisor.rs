//! fleet-supervisor
//!
//! Launches every upstream and then the gateway, watches them, and takes
//! the whole fleet down on interrupt or on the first unexpected exit.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use fleet_gateway::config::load_config;
use fleet_gateway::lifecycle::signals;
use fleet_gateway::observability::logging;
use fleet_gateway::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "fleet-supervisor", version, about = "Process supervisor for the service fleet")]
struct Cli {
    /// Path to a TOML config file, also handed to the gateway child.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fleet-supervisor: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("fleet-supervisor: failed to initialize logging: {}", e);
    }

    let interrupts = match signals::listen() {
        Ok(rx) => rx,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return ExitCode::from(2);
        }
    };

    let config_path = cli
        .config
        .map(|path| std::fs::canonicalize(&path).unwrap_or(path));
    let supervisor = Supervisor::new(config, config_path);

    match supervisor.run(interrupts).await {
        Ok(report) => {
            tracing::info!(reason = ?report.reason, children = report.children.len(), "Fleet stopped");
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            tracing::error!(error = %e, "Fleet failed to start");
            ExitCode::from(2)
        }
    }
}
