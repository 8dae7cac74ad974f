//! List Command

use anyhow::Result;
use serde::Serialize;

use super::Context;
use crate::config::ClientConfig;
use crate::output::{print_list, TableDisplay};

/// Membership display wrapper for serialization
#[derive(Serialize)]
pub struct MembershipDisplay {
    pub network: String,
    pub name: String,
    pub address: String,
    pub endpoint: String,
    pub roles: String,
    pub server: String,
}

impl From<ClientConfig> for MembershipDisplay {
    fn from(config: ClientConfig) -> Self {
        let node = config.node;
        let mut roles = Vec::new();
        if node.is_relay {
            roles.push("relay");
        }
        if node.is_relayed {
            roles.push("relayed");
        }
        if node.is_egress_gateway {
            roles.push("egress");
        }
        if node.is_ingress_gateway {
            roles.push("ingress");
        }
        if node.is_server {
            roles.push("server");
        }

        Self {
            network: node.network,
            name: node.name,
            address: node.address,
            endpoint: format!("{}:{}", node.endpoint, node.listen_port),
            roles: roles.join(","),
            server: config.server.api_addr,
        }
    }
}

impl TableDisplay for MembershipDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Network", "Name", "Address", "Endpoint", "Roles", "Server"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.network.clone(),
            self.name.clone(),
            self.address.clone(),
            self.endpoint.clone(),
            self.roles.clone(),
            self.server.clone(),
        ]
    }
}

pub fn execute(ctx: &Context) -> Result<()> {
    let store = ctx.store();
    let mut displays = Vec::new();
    for network in store.networks()? {
        displays.push(MembershipDisplay::from(store.load(&network)?));
    }
    print_list(&displays, ctx.format);
    Ok(())
}
