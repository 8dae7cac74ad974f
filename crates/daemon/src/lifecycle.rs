//! Node lifecycle
//!
//! Creation, role updates and deletion of node records. Every mutation
//! advances the owning network's `nodes_last_modified` stamp so clients can
//! tell their peer list is stale.

use crate::network::{allocate_address, allocate_address6};
use crate::state::StateManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wgmesh_common::crypto::hash_secret;
use wgmesh_common::store::{record_key, DELETED_NODES_TABLE, NODES_TABLE};
use wgmesh_common::{Error, Network, Node, NodeAction, Result, SERVER_NODE_NAME};

/// Register a node, assigning its mesh addresses.
///
/// The plaintext credential in `node.password` is hashed before storage.
pub fn create_node(state: &StateManager, mut node: Node) -> Result<Node> {
    let network = state.get_network(&node.network)?;
    let key = node.key()?;

    match state.get_live_node(&key) {
        Ok(_) => {
            return Err(Error::PolicyViolation(format!(
                "node {} is already a member of {}",
                node.mac_address, node.network
            )))
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let members = state.list_network_nodes(&network.net_id)?.len();
    if members as u64 >= u64::from(network.node_limit) {
        return Err(Error::PolicyViolation(format!(
            "network {} reached its node limit of {}",
            network.net_id, network.node_limit
        )));
    }

    node.set_defaults(&network);
    node.action = NodeAction::None;
    if node.address.is_empty() {
        node.address = allocate_address(state, &network)?;
    }
    if node.address6.is_none() {
        node.address6 = allocate_address6(state, &network)?;
    }
    if !node.password.is_empty() {
        node.password = hash_secret(&node.password)?;
    }
    node.validate()?;

    // A rejoin supersedes any earlier server-side deletion
    match state.store().delete(DELETED_NODES_TABLE, &key) {
        Ok(()) => debug!("Cleared tombstone for {}", key),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    state.put_node(&node)?;
    state.touch_nodes(&network.net_id)?;
    info!(
        "Created node {} in {} with address {}",
        node.mac_address, node.network, node.address
    );
    Ok(node)
}

/// Live record, or its tombstone when the server removed it.
pub fn get_node(state: &StateManager, key: &str) -> Result<Node> {
    match state.get_live_node(key) {
        Err(e) if e.is_not_found() => state.get_tombstone(key),
        other => other,
    }
}

/// Remove a node.
///
/// Without `exterminate` a tombstone is left under the same key so the node
/// learns of its removal on the next pull. With it, the tombstone is removed
/// as well and none is written.
pub fn delete_node(state: &StateManager, key: &str, exterminate: bool) -> Result<()> {
    let live = match state.get_live_node(key) {
        Ok(node) => Some(node),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    if exterminate {
        let cleared = match state.store().delete(DELETED_NODES_TABLE, key) {
            Ok(()) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };
        if live.is_none() && !cleared {
            return Err(Error::not_found(NODES_TABLE, key));
        }
    }

    let Some(mut node) = live else {
        if exterminate {
            return Ok(());
        }
        return Err(Error::not_found(NODES_TABLE, key));
    };

    if !exterminate {
        node.action = NodeAction::Delete;
        node.last_modified = chrono::Utc::now().timestamp();
        state.put_tombstone(&node)?;
    }
    state.store().delete(NODES_TABLE, key)?;

    if node.is_relay {
        set_relayed(state, &node.network, &node.relay_addrs, false)?;
    }
    state.touch_nodes(&node.network)?;
    info!(
        "Deleted node {} (exterminate: {})",
        key, exterminate
    );
    Ok(())
}

/// Administrative role and policy changes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub allowed_ips: Option<Vec<String>>,
    pub persistent_keepalive: Option<u16>,
    pub is_relay: Option<bool>,
    pub relay_addrs: Option<Vec<String>>,
    pub is_egress_gateway: Option<bool>,
    pub egress_gateway_ranges: Option<Vec<String>>,
    pub is_ingress_gateway: Option<bool>,
    pub ingress_gateway_range: Option<String>,
    pub is_pending: Option<bool>,
    pub udp_hole_punch: Option<bool>,
}

/// Apply an administrative update to a live node.
///
/// Making a node a relay marks the nodes at its relay addresses as relayed;
/// dropping the role or changing the list releases the old ones.
pub fn update_node(state: &StateManager, key: &str, update: &NodeUpdate) -> Result<Node> {
    let current = state.get_live_node(key)?;
    let mut node = current.clone();

    if let Some(name) = &update.name {
        node.name = name.clone();
    }
    if let Some(allowed) = &update.allowed_ips {
        node.allowed_ips = allowed.clone();
    }
    if let Some(keepalive) = update.persistent_keepalive {
        node.persistent_keepalive = keepalive;
    }
    if let Some(is_relay) = update.is_relay {
        node.is_relay = is_relay;
    }
    if let Some(addrs) = &update.relay_addrs {
        node.relay_addrs = addrs.clone();
    }
    if !node.is_relay {
        node.relay_addrs.clear();
    }
    if let Some(is_egress) = update.is_egress_gateway {
        node.is_egress_gateway = is_egress;
    }
    if let Some(ranges) = &update.egress_gateway_ranges {
        node.egress_gateway_ranges = ranges.clone();
    }
    if !node.is_egress_gateway {
        node.egress_gateway_ranges.clear();
    }
    if let Some(is_ingress) = update.is_ingress_gateway {
        node.is_ingress_gateway = is_ingress;
    }
    if let Some(range) = &update.ingress_gateway_range {
        node.ingress_gateway_range = Some(range.clone());
    }
    if node.is_ingress_gateway && node.ingress_gateway_range.is_none() {
        let network = state.get_network(&node.network)?;
        node.ingress_gateway_range = Some(network.address_range);
    }
    if !node.is_ingress_gateway {
        node.ingress_gateway_range = None;
    }
    if let Some(pending) = update.is_pending {
        node.is_pending = pending;
    }
    if let Some(punch) = update.udp_hole_punch {
        node.udp_hole_punch = punch;
    }

    node.validate_roles()?;
    node.last_modified = chrono::Utc::now().timestamp();
    state.put_node(&node)?;

    if current.relay_addrs != node.relay_addrs {
        set_relayed(state, &node.network, &current.relay_addrs, false)?;
        set_relayed(state, &node.network, &node.relay_addrs, true)?;
    }
    state.touch_nodes(&node.network)?;
    info!("Updated node {}", key);
    Ok(node)
}

/// Flip `is_relayed` on the nodes of `network` at the given addresses.
fn set_relayed(state: &StateManager, network: &str, addrs: &[String], relayed: bool) -> Result<()> {
    if addrs.is_empty() {
        return Ok(());
    }
    for mut node in state.list_network_nodes(network)? {
        if !addrs.contains(&node.address) || node.is_relayed == relayed {
            continue;
        }
        if node.is_relay && relayed {
            warn!("Not marking relay {} as relayed", node.mac_address);
            continue;
        }
        node.is_relayed = relayed;
        state.put_node(&node)?;
        debug!("Node {} relayed: {}", node.mac_address, relayed);
    }
    Ok(())
}

/// Make sure the server has its own node in `network`.
pub fn ensure_server_node(state: &StateManager, network: &Network) -> Result<Node> {
    let server = &state.config().server;
    let key = record_key(&server.identity, &network.net_id)?;
    match state.get_live_node(&key) {
        Ok(node) => return Ok(node),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let keys = state.server_keypair()?;
    let node = Node {
        name: SERVER_NODE_NAME.to_string(),
        mac_address: server.identity.clone(),
        network: network.net_id.clone(),
        public_key: keys.public_key.to_base64(),
        endpoint: server.endpoint.clone(),
        listen_port: server.listen_port,
        is_server: true,
        ..Default::default()
    };
    create_node(state, node)
}
