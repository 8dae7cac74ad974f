//! WgMesh CLI - Main Entry Point

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wgmesh_cli::commands::{agent, join, leave, list, pull, Context};
use wgmesh_cli::output::{print_error, OutputFormat};

/// WgMesh node agent
#[derive(Parser)]
#[command(name = "wgmesh")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding per-network configs (default: ~/.wgmesh/networks)
    #[arg(long, env = "WGMESH_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Directory for generated wg-quick files (default: <config-dir>/interfaces)
    #[arg(long, global = true)]
    interface_dir: Option<PathBuf>,

    /// Control plane address, overriding the one stored with memberships
    #[arg(long, env = "WGMESH_SERVER", global = true)]
    server: Option<String>,

    /// Control plane access token
    #[arg(long, env = "WGMESH_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a network
    Join(join::JoinArgs),

    /// Leave a network
    Leave(leave::LeaveArgs),

    /// Fetch peers and rewrite the interface config
    Pull(pull::PullArgs),

    /// Refresh the local node record from the server
    Checkin(pull::CheckinArgs),

    /// List local memberships
    List,

    /// Keep all memberships in sync until interrupted
    Daemon(agent::DaemonArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config_dir = cli
        .config_dir
        .unwrap_or_else(wgmesh_common::default_client_dir);
    let ctx = Context {
        interface_dir: cli
            .interface_dir
            .unwrap_or_else(|| config_dir.join("interfaces")),
        config_dir,
        server_addr: cli.server,
        access_token: cli.access_token,
        format: cli.format,
    };

    let result = match cli.command {
        Commands::Join(args) => join::execute(args, &ctx).await,
        Commands::Leave(args) => leave::execute(args, &ctx).await,
        Commands::Pull(args) => pull::execute_pull(args, &ctx).await,
        Commands::Checkin(args) => pull::execute_checkin(args, &ctx).await,
        Commands::List => list::execute(&ctx),
        Commands::Daemon(args) => agent::execute(args, &ctx).await,
        Commands::Version => {
            println!("WgMesh CLI v{}", wgmesh_common::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
