//! Leave Command

use anyhow::{Context as _, Result};
use clap::Args;

use super::Context;
use crate::output::print_success;

#[derive(Args)]
pub struct LeaveArgs {
    /// Network to leave
    pub network: String,
}

pub async fn execute(args: LeaveArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    client
        .leave(&args.network)
        .await
        .with_context(|| format!("leaving {}", args.network))?;
    print_success(&format!("Left {}", args.network));
    Ok(())
}
