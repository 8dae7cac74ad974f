//! Peer resolution
//!
//! Computes which peers a node sees. Two modes:
//!
//! - plain enumeration: every active member of the network, optionally
//!   without relayed nodes, with hole-punch endpoint overrides and relay
//!   allowed-IP expansion;
//! - relay-anchored: a relayed node gets exactly one peer, the relay that
//!   serves its address, carrying the whole network range.
//!
//! Results are derived from a fresh store snapshot on every call. Self and
//! duplicate-endpoint exclusion happen later, in the peer config translator.

use crate::holepunch::{self, EndpointMap};
use crate::state::StateManager;
use tracing::{debug, warn};
use wgmesh_common::{ExtPeerView, Network, Node, PeerView, Result};

/// How a resolution is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode<'a> {
    /// All active members; relayed nodes dropped when `exclude_relayed`
    Plain { exclude_relayed: bool },
    /// Only the relay serving this relayed address
    RelayAnchored { relayed_address: &'a str },
}

/// Resolve the peer views of `network` in the given mode.
pub fn resolve_peers(state: &StateManager, network: &str, mode: ResolveMode<'_>) -> Result<Vec<PeerView>> {
    let nodes = state.list_network_nodes(network)?;
    let net = lookup_network(state, network);
    let registry = if state.config().hole_punch {
        match holepunch::endpoint_map(state, network) {
            Ok(map) => map,
            Err(e) => {
                warn!("Ignoring hole-punch registry for {}: {}", network, e);
                EndpointMap::new()
            }
        }
    } else {
        EndpointMap::new()
    };

    match mode {
        ResolveMode::Plain { exclude_relayed } => {
            Ok(enumerate(&nodes, net.as_ref(), &registry, exclude_relayed))
        }
        ResolveMode::RelayAnchored { relayed_address } => {
            Ok(anchor(&nodes, net.as_ref(), &registry, relayed_address)
                .into_iter()
                .collect())
        }
    }
}

/// External clients bound to the ingress gateway `ingress_id` on `network`.
pub fn resolve_ext_peers(state: &StateManager, ingress_id: &str, network: &str) -> Result<Vec<ExtPeerView>> {
    Ok(state
        .list_ext_clients()?
        .iter()
        .filter(|c| c.network == network && c.ingress_gateway_id == ingress_id)
        .map(ExtPeerView::from)
        .collect())
}

fn lookup_network(state: &StateManager, network: &str) -> Option<Network> {
    match state.get_network(network) {
        Ok(net) => Some(net),
        Err(e) => {
            warn!("Network {} unavailable for relay ranges: {}", network, e);
            None
        }
    }
}

/// Allowed IPs a relay carries: the network range when known, else its
/// explicit relay address list.
fn relay_allowed_ips(relay: &Node, network: Option<&Network>) -> Vec<String> {
    match network {
        Some(net) => {
            let mut ranges = vec![net.address_range.clone()];
            if let Some(range6) = net.address_range6.as_ref().filter(|r| !r.is_empty()) {
                ranges.push(range6.clone());
            }
            ranges
        }
        None => relay.relay_addrs.clone(),
    }
}

fn apply_hole_punch(view: &mut PeerView, registry: &EndpointMap) {
    if !view.udp_hole_punch {
        return;
    }
    if let Some((host, port)) = holepunch::lookup(registry, &view.public_key) {
        debug!("Hole-punch override for {}: {}:{}", view.mac_address, host, port);
        view.endpoint = host;
        view.listen_port = port;
    }
}

fn enumerate(
    nodes: &[Node],
    network: Option<&Network>,
    registry: &EndpointMap,
    exclude_relayed: bool,
) -> Vec<PeerView> {
    nodes
        .iter()
        .filter(|n| !n.is_pending && !n.is_deleted())
        .filter(|n| !(n.is_relayed && exclude_relayed))
        .map(|node| {
            let mut view = PeerView::from(node);
            apply_hole_punch(&mut view, registry);
            if node.is_relay {
                for range in relay_allowed_ips(node, network) {
                    if !view.allowed_ips.contains(&range) {
                        view.allowed_ips.push(range);
                    }
                }
            }
            view
        })
        .collect()
}

fn anchor(
    nodes: &[Node],
    network: Option<&Network>,
    registry: &EndpointMap,
    relayed_address: &str,
) -> Option<PeerView> {
    let relay = nodes.iter().find(|n| {
        n.is_relay && !n.is_pending && n.relay_addrs.iter().any(|a| a == relayed_address)
    })?;

    let mut view = PeerView::from(relay);
    view.allowed_ips = relay_allowed_ips(relay, network);

    if relay.udp_hole_punch {
        let live = enumerate(nodes, network, registry, false)
            .into_iter()
            .find(|p| p.address == relay.address);
        if let Some(live) = live {
            view.endpoint = live.endpoint;
            view.listen_port = live.listen_port;
        }
    }
    Some(view)
}
