//! Pull and Check-in Commands

use anyhow::{bail, Result};
use clap::Args;

use super::Context;
use crate::output::{print_error, print_success, print_warning};
use crate::sync::{PullOutcome, ALL_NETWORKS};

#[derive(Args)]
pub struct PullArgs {
    /// Network to pull, or "all"
    #[arg(default_value = ALL_NETWORKS)]
    pub network: String,
}

#[derive(Args)]
pub struct CheckinArgs {
    /// Network to check in with, or "all"
    #[arg(default_value = ALL_NETWORKS)]
    pub network: String,
}

pub async fn execute_pull(args: PullArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    let report = client.pull_selected(&args.network).await?;

    for (network, outcome) in &report.pulled {
        match outcome {
            PullOutcome::Applied { peers } => {
                print_success(&format!("{}: {} peers", network, peers))
            }
            PullOutcome::Removed => print_warning(&format!("{}: removed by the server", network)),
        }
    }
    for network in &report.failed {
        print_error(&format!("{}: pull failed", network));
    }

    match report.last_error {
        Some(err) => bail!(
            "{} of {} networks failed: {}",
            report.failed.len(),
            report.failed.len() + report.pulled.len(),
            err
        ),
        None => Ok(()),
    }
}

pub async fn execute_checkin(args: CheckinArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    let networks = if args.network == ALL_NETWORKS {
        client.store().networks()?
    } else {
        vec![args.network]
    };

    let mut failed = 0usize;
    for network in &networks {
        match client.check_in(network).await {
            Ok(node) if node.is_deleted() => {
                print_warning(&format!("{}: removed by the server", network))
            }
            Ok(_) => print_success(&format!("{}: checked in", network)),
            Err(e) => {
                failed += 1;
                print_error(&format!("{}: {}", network, e));
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} check-ins failed", failed, networks.len());
    }
    Ok(())
}
