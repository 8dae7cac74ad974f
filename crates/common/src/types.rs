//! Core types for WgMesh

use crate::store::record_key;
use crate::{Error, Result};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Name given to the node a control-plane server runs for itself.
pub const SERVER_NODE_NAME: &str = "wgmesh-server";

/// Default WireGuard listen port for new networks
pub const DEFAULT_LISTEN_PORT: u16 = 51821;

/// Default persistent keepalive (seconds) for new networks
pub const DEFAULT_KEEPALIVE: u16 = 20;

/// Default check-in interval (seconds) for new networks
pub const DEFAULT_CHECK_IN_INTERVAL: u32 = 30;

/// Effectively unbounded node limit
pub const DEFAULT_NODE_LIMIT: u32 = 999_999_999;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Lifecycle action carried by a node record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAction {
    #[serde(alias = "noop")]
    None,
    Delete,
}

impl Default for NodeAction {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for NodeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeAction::None => write!(f, "none"),
            NodeAction::Delete => write!(f, "delete"),
        }
    }
}

// ============================================================================
// Node
// ============================================================================

/// A mesh member. Unique per (mac_address, network).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Node {
    pub name: String,
    /// Stable hardware identity
    pub mac_address: String,
    pub network: String,
    pub public_key: String,
    /// Advertised public IP, without port
    pub endpoint: String,
    pub listen_port: u16,
    pub local_address: Option<String>,
    /// Mesh-assigned IPv4 address
    pub address: String,
    /// Mesh-assigned IPv6 address
    pub address6: Option<String>,
    pub allowed_ips: Vec<String>,
    pub persistent_keepalive: u16,
    pub interface: String,
    pub check_in_interval: u32,

    pub is_relay: bool,
    pub is_relayed: bool,
    pub relay_addrs: Vec<String>,
    pub is_egress_gateway: bool,
    pub egress_gateway_ranges: Vec<String>,
    pub is_ingress_gateway: bool,
    pub ingress_gateway_range: Option<String>,
    pub is_server: bool,
    pub is_pending: bool,
    pub is_dual_stack: bool,
    pub udp_hole_punch: bool,

    pub action: NodeAction,
    /// Credential. Plaintext on the client, SHA-256 hex on the server.
    pub password: String,
    pub last_modified: i64,
    pub last_check_in: i64,
    pub version: String,
}

impl Node {
    /// Store key for this node
    pub fn key(&self) -> Result<String> {
        record_key(&self.mac_address, &self.network)
    }

    /// True when this record is a tombstone
    pub fn is_deleted(&self) -> bool {
        self.action == NodeAction::Delete
    }

    /// Fill unset policy fields from the owning network.
    pub fn set_defaults(&mut self, network: &Network) {
        if self.interface.is_empty() {
            self.interface = network.default_interface.clone();
        }
        if self.listen_port == 0 {
            self.listen_port = network.default_listen_port;
        }
        if self.persistent_keepalive == 0 {
            self.persistent_keepalive = network.default_keepalive;
        }
        if self.check_in_interval == 0 {
            self.check_in_interval = network.default_check_in_interval;
        }
        if self.name.is_empty() {
            self.name = self.mac_address.clone();
        }
        if network.is_dual_stack {
            self.is_dual_stack = true;
        }
        self.last_modified = now();
    }

    /// Check identity fields and role consistency.
    pub fn validate(&self) -> Result<()> {
        if self.mac_address.is_empty() {
            return Err(Error::Malformed("node identity is required".to_string()));
        }
        if self.network.is_empty() {
            return Err(Error::Malformed("node network is required".to_string()));
        }
        if self.public_key.is_empty() {
            return Err(Error::Malformed("node public key is required".to_string()));
        }
        self.validate_roles()
    }

    /// Role flags must describe a single-hop topology.
    pub fn validate_roles(&self) -> Result<()> {
        if self.is_relay && self.is_relayed {
            return Err(Error::Malformed(format!(
                "node {} cannot be both a relay and relayed",
                self.mac_address
            )));
        }
        if self.is_relay {
            for addr in &self.relay_addrs {
                addr.parse::<IpAddr>().map_err(|_| {
                    Error::Malformed(format!("invalid relay address {addr}"))
                })?;
            }
        }
        if self.is_egress_gateway && self.egress_gateway_ranges.is_empty() {
            return Err(Error::Malformed(format!(
                "egress gateway {} advertises no ranges",
                self.mac_address
            )));
        }
        if self.is_ingress_gateway {
            let range = self.ingress_gateway_range.as_deref().unwrap_or_default();
            range.parse::<IpNetwork>().map_err(|_| {
                Error::Malformed(format!("invalid ingress gateway range {range:?}"))
            })?;
        }
        Ok(())
    }
}

// ============================================================================
// Network
// ============================================================================

/// A mesh: one address space and policy set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Network {
    pub net_id: String,
    pub display_name: String,
    pub address_range: String,
    pub address_range6: Option<String>,
    pub local_range: Option<String>,
    pub default_interface: String,
    pub default_listen_port: u16,
    pub default_keepalive: u16,
    pub default_check_in_interval: u32,
    pub node_limit: u32,
    pub is_dual_stack: bool,
    pub nodes_last_modified: i64,
    pub network_last_modified: i64,
}

impl Network {
    pub fn new(net_id: impl Into<String>, address_range: impl Into<String>) -> Self {
        Self {
            net_id: net_id.into(),
            address_range: address_range.into(),
            ..Default::default()
        }
    }

    pub fn set_defaults(&mut self) {
        if self.display_name.is_empty() {
            self.display_name = self.net_id.clone();
        }
        if self.default_interface.is_empty() {
            self.default_interface = if self.net_id.len() < 13 {
                format!("nm-{}", self.net_id)
            } else {
                self.net_id.clone()
            };
        }
        if self.default_listen_port == 0 {
            self.default_listen_port = DEFAULT_LISTEN_PORT;
        }
        if self.default_keepalive == 0 {
            self.default_keepalive = DEFAULT_KEEPALIVE;
        }
        if self.default_check_in_interval == 0 {
            self.default_check_in_interval = DEFAULT_CHECK_IN_INTERVAL;
        }
        if self.node_limit == 0 {
            self.node_limit = DEFAULT_NODE_LIMIT;
        }
        if self.address_range6.is_some() {
            self.is_dual_stack = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let id_ok = !self.net_id.is_empty()
            && self.net_id.len() <= 12
            && self
                .net_id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !id_ok {
            return Err(Error::Malformed(format!(
                "invalid network id {:?}: 1-12 characters of a-z, 0-9 and '-'",
                self.net_id
            )));
        }
        self.ipv4_range()?;
        self.ipv6_range()?;
        if let Some(local) = &self.local_range {
            local
                .parse::<IpNetwork>()
                .map_err(|_| Error::Malformed(format!("invalid local range {local}")))?;
        }
        Ok(())
    }

    /// Parsed IPv4 address pool
    pub fn ipv4_range(&self) -> Result<Ipv4Network> {
        self.address_range
            .parse()
            .map_err(|_| Error::Malformed(format!("invalid address range {}", self.address_range)))
    }

    /// Parsed IPv6 address pool, if the network has one
    pub fn ipv6_range(&self) -> Result<Option<Ipv6Network>> {
        match self.address_range6.as_deref() {
            None | Some("") => Ok(None),
            Some(range) => range
                .parse()
                .map(Some)
                .map_err(|_| Error::Malformed(format!("invalid address range {range}"))),
        }
    }

    /// Advance the node modification stamp. Strictly increasing even within
    /// one second.
    pub fn touch_nodes(&mut self) {
        self.nodes_last_modified = now().max(self.nodes_last_modified + 1);
    }

    pub fn touch_network(&mut self) {
        self.network_last_modified = now().max(self.network_last_modified + 1);
    }

    /// Apply an administrative update. Address pools only change here.
    pub fn apply_update(&mut self, update: &NetworkUpdate) -> Result<()> {
        let mut next = self.clone();
        if let Some(name) = &update.display_name {
            next.display_name = name.clone();
        }
        if let Some(range) = &update.address_range {
            next.address_range = range.clone();
        }
        if let Some(range6) = &update.address_range6 {
            next.address_range6 = Some(range6.clone());
            next.is_dual_stack = true;
        }
        if let Some(keepalive) = update.default_keepalive {
            next.default_keepalive = keepalive;
        }
        if let Some(interval) = update.default_check_in_interval {
            next.default_check_in_interval = interval;
        }
        if let Some(limit) = update.node_limit {
            next.node_limit = limit;
        }
        next.validate()?;
        next.touch_network();
        *self = next;
        Ok(())
    }
}

/// Administrative network update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkUpdate {
    pub display_name: Option<String>,
    pub address_range: Option<String>,
    pub address_range6: Option<String>,
    pub default_keepalive: Option<u16>,
    pub default_check_in_interval: Option<u32>,
    pub node_limit: Option<u32>,
}

// ============================================================================
// External clients
// ============================================================================

/// A non-managed peer bound to one ingress gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExtClient {
    pub client_id: String,
    pub network: String,
    /// Identity (mac address) of the ingress gateway node
    pub ingress_gateway_id: String,
    pub ingress_gateway_endpoint: String,
    pub public_key: String,
    pub address: String,
    pub address6: Option<String>,
    pub endpoint: String,
    pub listen_port: u16,
    pub local_address: Option<String>,
    pub keepalive: u16,
    pub enabled: bool,
    pub last_modified: i64,
}

impl ExtClient {
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() || self.network.is_empty() {
            return Err(Error::Malformed(
                "ext client id and network are required".to_string(),
            ));
        }
        if self.ingress_gateway_id.is_empty() {
            return Err(Error::Malformed(format!(
                "ext client {} is not bound to an ingress gateway",
                self.client_id
            )));
        }
        if self.public_key.is_empty() {
            return Err(Error::Malformed(format!(
                "ext client {} has no public key",
                self.client_id
            )));
        }
        Ok(())
    }
}
