//! Join Command

use anyhow::{Context as _, Result};
use clap::Args;
use wgmesh_common::{Node, VERSION};

use super::Context;
use crate::output::print_success;

#[derive(Args)]
pub struct JoinArgs {
    /// Network to join
    pub network: String,

    /// Display name (defaults to the hostname)
    #[arg(long)]
    pub name: Option<String>,

    /// Stable node identity (defaults to the hostname)
    #[arg(long)]
    pub identity: Option<String>,

    /// Public IP other peers reach this node on
    #[arg(long)]
    pub endpoint: String,

    /// WireGuard listen port (network default when unset)
    #[arg(long)]
    pub port: Option<u16>,

    /// LAN address, used by peers behind the same NAT
    #[arg(long)]
    pub local_address: Option<String>,

    /// Let the server rewrite the endpoint from observed traffic
    #[arg(long)]
    pub hole_punch: bool,

    /// Pre-shared credential (generated when unset)
    #[arg(long, env = "WGMESH_NODE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

fn hostname() -> Result<String> {
    hostname::get()
        .context("reading hostname")?
        .into_string()
        .map_err(|_| anyhow::anyhow!("hostname is not valid UTF-8"))
}

impl JoinArgs {
    fn template(self) -> Result<Node> {
        let identity = match self.identity {
            Some(identity) => identity,
            None => hostname()?,
        };
        Ok(Node {
            name: self.name.unwrap_or_else(|| identity.clone()),
            mac_address: identity,
            network: self.network,
            endpoint: self.endpoint,
            listen_port: self.port.unwrap_or_default(),
            local_address: self.local_address,
            udp_hole_punch: self.hole_punch,
            password: self.password.unwrap_or_default(),
            version: VERSION.to_string(),
            ..Default::default()
        })
    }
}

pub async fn execute(args: JoinArgs, ctx: &Context) -> Result<()> {
    let network = args.network.clone();
    let template = args.template()?;
    let client = ctx.client()?;

    client
        .join(template)
        .await
        .with_context(|| format!("joining {network}"))?;

    let node = client.store().load(&network)?.node;
    print_success(&format!("Joined {} as {} ({})", network, node.name, node.address));
    Ok(())
}
