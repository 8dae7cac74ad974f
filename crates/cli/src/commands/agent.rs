//! Daemon Command

use anyhow::Result;
use clap::Args;
use std::time::Duration;
use tracing::warn;

use super::Context;
use crate::agent::{default_interval, run_until};
use crate::output::print_message;

#[derive(Args)]
pub struct DaemonArgs {
    /// Seconds between sync cycles (shortest membership check-in interval
    /// when unset)
    #[arg(long)]
    pub interval: Option<u64>,
}

pub async fn execute(args: DaemonArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    let interval = match args.interval {
        Some(secs) => Duration::from_secs(secs.max(1)),
        None => default_interval(&client),
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let cycles = run_until(&client, interval, shutdown).await?;
    print_message(&format!("Stopped after {} sync cycles", cycles), ctx.format);
    Ok(())
}
