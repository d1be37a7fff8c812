//! `pageant-bridge` daemon binary.
//!
//! Bootstraps the application home, logging and configuration, then runs
//! the supervisor until SIGINT/SIGTERM and tears everything down
//! cooperatively.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use pageant_bridge::config::{self, BridgeConfig};
use pageant_bridge::{BridgeError, Result, SecurityValidator, Supervisor, SupervisorConfig};

#[derive(Debug, Parser)]
#[command(name = "pageant-bridge", about = "Pageant to SSH agent protocol bridge", version)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the upstream agent endpoint from the config file.
    #[arg(long)]
    agent_endpoint: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing();
    info!("pageant-bridge starting up");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| BridgeError::Config(format!("failed to build tokio runtime: {e}")))?
        .block_on(run(args))
}

fn init_tracing() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

async fn run(args: Cli) -> Result<()> {
    config::ensure_app_dirs()?;

    let config_path = match args.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let mut bridge_config = BridgeConfig::load_or_create(&config_path);
    if let Some(endpoint) = args.agent_endpoint {
        bridge_config.agent_endpoint = endpoint;
    }
    info!(agent_endpoint = %bridge_config.agent_endpoint, "configuration loaded");

    let supervisor = Supervisor::new(
        SupervisorConfig::for_current_user(bridge_config.agent_endpoint.clone()),
        Arc::new(SecurityValidator::new()),
    );
    supervisor.start().await;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping frontends");

    supervisor.stop().await;

    if let Err(e) = bridge_config.store(&config_path) {
        error!(error = %e, "failed to store config on shutdown");
    }
    info!("pageant-bridge stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}
