//! Network management and the free-address allocator

use crate::state::StateManager;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::info;
use wgmesh_common::store::NETWORKS_TABLE;
use wgmesh_common::{Error, Network, NetworkUpdate, Result};

/// Upper bound on IPv6 candidates tried before reporting exhaustion
const V6_SCAN_LIMIT: usize = 65_536;

/// Create a network. Ids are unique.
pub fn create_network(state: &StateManager, mut network: Network) -> Result<Network> {
    network.set_defaults();
    network.validate()?;

    match state.get_network(&network.net_id) {
        Ok(_) => {
            return Err(Error::PolicyViolation(format!(
                "network {} already exists",
                network.net_id
            )))
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    network.touch_network();
    network.touch_nodes();
    state.put_network(&network)?;
    info!("Created network {} ({})", network.net_id, network.address_range);
    Ok(network)
}

/// Apply an administrative update
pub fn update_network(state: &StateManager, net_id: &str, update: &NetworkUpdate) -> Result<Network> {
    let mut network = state.get_network(net_id)?;
    network.apply_update(update)?;
    state.put_network(&network)?;
    info!("Updated network {}", net_id);
    Ok(network)
}

/// Delete a network that has no members left
pub fn delete_network(state: &StateManager, net_id: &str) -> Result<()> {
    let members = state
        .list_network_nodes(net_id)?
        .into_iter()
        .filter(|n| !n.is_server)
        .count();
    if members > 0 {
        return Err(Error::PolicyViolation(format!(
            "network {net_id} still has {members} nodes"
        )));
    }
    for server in state.list_network_nodes(net_id)? {
        state
            .store()
            .delete(wgmesh_common::store::NODES_TABLE, &server.key()?)?;
    }
    state.store().delete(NETWORKS_TABLE, net_id)?;
    info!("Deleted network {}", net_id);
    Ok(())
}

/// Make sure the comms network exists
pub fn ensure_comms_network(state: &StateManager) -> Result<Network> {
    let comms = &state.config().comms;
    match state.get_network(&comms.net_id) {
        Ok(network) => Ok(network),
        Err(e) if e.is_not_found() => {
            create_network(state, Network::new(&comms.net_id, &comms.address_range))
        }
        Err(e) => Err(e),
    }
}

fn used_addresses(state: &StateManager, net_id: &str) -> Result<HashSet<IpAddr>> {
    let mut used = HashSet::new();
    for node in state.list_network_nodes(net_id)? {
        used.extend(node.address.parse::<IpAddr>().ok());
        used.extend(node.address6.as_deref().and_then(|a| a.parse::<IpAddr>().ok()));
    }
    for client in state.list_ext_clients()? {
        if client.network != net_id {
            continue;
        }
        used.extend(client.address.parse::<IpAddr>().ok());
        used.extend(client.address6.as_deref().and_then(|a| a.parse::<IpAddr>().ok()));
    }
    Ok(used)
}

/// First free IPv4 host address in the network's pool
pub fn allocate_address(state: &StateManager, network: &Network) -> Result<String> {
    let range = network.ipv4_range()?;
    let used = used_addresses(state, &network.net_id)?;
    let has_edges = range.prefix() < 31;

    range
        .iter()
        .filter(|ip| !has_edges || (*ip != range.network() && *ip != range.broadcast()))
        .find(|ip| !used.contains(&IpAddr::V4(*ip)))
        .map(|ip| ip.to_string())
        .ok_or_else(|| {
            Error::PolicyViolation(format!(
                "address pool {} of network {} is exhausted",
                network.address_range, network.net_id
            ))
        })
}

/// First free IPv6 address in the network's pool, if it has one
pub fn allocate_address6(state: &StateManager, network: &Network) -> Result<Option<String>> {
    let Some(range) = network.ipv6_range()? else {
        return Ok(None);
    };
    let used = used_addresses(state, &network.net_id)?;

    range
        .iter()
        .skip(1)
        .take(V6_SCAN_LIMIT)
        .find(|ip| !used.contains(&IpAddr::V6(*ip)))
        .map(|ip| Some(ip.to_string()))
        .ok_or_else(|| {
            Error::PolicyViolation(format!(
                "address pool {:?} of network {} is exhausted",
                network.address_range6, network.net_id
            ))
        })
}
