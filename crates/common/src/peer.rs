//! Peer views
//!
//! A peer view is what one mesh member may learn about another. The
//! projections here are the only way a stored record becomes peer-facing
//! data: a field they do not copy never leaves the server.

use crate::types::{ExtClient, Node};
use serde::{Deserialize, Serialize};

/// Peer-facing projection of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PeerView {
    pub mac_address: String,
    pub network: String,
    pub public_key: String,
    pub endpoint: String,
    pub listen_port: u16,
    pub local_address: Option<String>,
    pub address: String,
    pub address6: Option<String>,
    pub allowed_ips: Vec<String>,
    pub persistent_keepalive: u16,
    pub is_relay: bool,
    pub is_relayed: bool,
    pub relay_addrs: Vec<String>,
    pub is_egress_gateway: bool,
    pub egress_gateway_ranges: Vec<String>,
    pub is_ingress_gateway: bool,
    pub ingress_gateway_range: Option<String>,
    pub is_server: bool,
    pub is_pending: bool,
    pub udp_hole_punch: bool,
}

impl From<&Node> for PeerView {
    fn from(node: &Node) -> Self {
        Self {
            mac_address: node.mac_address.clone(),
            network: node.network.clone(),
            public_key: node.public_key.clone(),
            endpoint: node.endpoint.clone(),
            listen_port: node.listen_port,
            local_address: node.local_address.clone(),
            address: node.address.clone(),
            address6: node.address6.clone(),
            allowed_ips: node.allowed_ips.clone(),
            persistent_keepalive: node.persistent_keepalive,
            is_relay: node.is_relay,
            is_relayed: node.is_relayed,
            relay_addrs: node.relay_addrs.clone(),
            is_egress_gateway: node.is_egress_gateway,
            egress_gateway_ranges: node.egress_gateway_ranges.clone(),
            is_ingress_gateway: node.is_ingress_gateway,
            ingress_gateway_range: node.ingress_gateway_range.clone(),
            is_server: node.is_server,
            is_pending: node.is_pending,
            udp_hole_punch: node.udp_hole_punch,
        }
    }
}

/// Peer-facing projection of an external client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExtPeerView {
    pub client_id: String,
    pub public_key: String,
    pub address: String,
    pub address6: Option<String>,
    pub endpoint: String,
    pub listen_port: u16,
    pub local_address: Option<String>,
    pub keepalive: u16,
}

impl From<&ExtClient> for ExtPeerView {
    fn from(client: &ExtClient) -> Self {
        Self {
            client_id: client.client_id.clone(),
            public_key: client.public_key.clone(),
            address: client.address.clone(),
            address6: client.address6.clone(),
            endpoint: client.endpoint.clone(),
            listen_port: client.listen_port,
            local_address: client.local_address.clone(),
            keepalive: client.keepalive,
        }
    }
}
