//! WgMesh Daemon
//!
//! Serves the mesh control plane over HTTP.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wgmesh_daemon::{bootstrap, router, DaemonConfig, StateManager};

#[derive(Parser)]
#[command(name = "wgmeshd")]
#[command(about = "WgMesh daemon - WireGuard mesh control plane")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WGMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Bearer token required on API routes
    #[arg(long, env = "WGMESH_ACCESS_TOKEN")]
    access_token: Option<String>,

    /// Public IP of this server
    #[arg(long)]
    endpoint: Option<String>,

    /// Disable hole-punch endpoint overrides
    #[arg(long)]
    no_hole_punch: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("WgMesh daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration, then apply flag overrides
    let config_path = cli
        .config
        .unwrap_or_else(|| wgmesh_common::default_store_path().join("wgmeshd.toml"));
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if cli.access_token.is_some() {
        config.access_token = cli.access_token;
    }
    if let Some(endpoint) = cli.endpoint {
        config.server.endpoint = endpoint;
    }
    if cli.no_hole_punch {
        config.hole_punch = false;
    }

    let state = StateManager::new(&config)?;
    bootstrap(&state)?;

    if config.access_token.is_none() {
        tracing::warn!("No access token configured, API is unauthenticated");
    }

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("Daemon listening on {}", config.listen);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("Daemon shutdown complete");
    Ok(())
}
