//! Node service contract
//!
//! The operations a mesh member performs against the control plane. The
//! daemon implements this trait directly over its store; the client
//! implements it over HTTP. Requests travel in an [`Object`] envelope whose
//! `data` is either a JSON document or an `identity###network` key.

use crate::peer::{ExtPeerView, PeerView};
use crate::store::{record_key, split_record_key};
use crate::types::Node;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// What an envelope's `data` holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Node,
    Key,
    Peers,
    ExtPeers,
}

/// Request/response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub data: String,
    pub kind: ObjectKind,
}

impl Object {
    pub fn node(node: &Node) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_string(node)?,
            kind: ObjectKind::Node,
        })
    }

    pub fn key(identity: &str, network: &str) -> Result<Self> {
        Ok(Self {
            data: record_key(identity, network)?,
            kind: ObjectKind::Key,
        })
    }

    pub fn peers(peers: &[PeerView]) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_string(peers)?,
            kind: ObjectKind::Peers,
        })
    }

    pub fn ext_peers(peers: &[ExtPeerView]) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_string(peers)?,
            kind: ObjectKind::ExtPeers,
        })
    }

    /// Decode the JSON payload, checking the envelope kind first.
    pub fn decode<T: DeserializeOwned>(&self, expected: ObjectKind) -> Result<T> {
        self.expect(expected)?;
        Ok(serde_json::from_str(&self.data)?)
    }

    /// Split a key payload into `(identity, network)`.
    pub fn split_key(&self) -> Result<(&str, &str)> {
        self.expect(ObjectKind::Key)?;
        split_record_key(&self.data)
    }

    fn expect(&self, expected: ObjectKind) -> Result<()> {
        if self.kind != expected {
            return Err(Error::Malformed(format!(
                "expected {:?} payload, got {:?}",
                expected, self.kind
            )));
        }
        Ok(())
    }
}

/// Control-plane operations available to a node
#[async_trait]
pub trait NodeService: Send + Sync {
    /// Register a node. The returned record carries the assigned addresses.
    async fn create_node(&self, node: &Node) -> Result<Node>;

    /// Check in: authenticate with the node's credential and return the
    /// authoritative record (a tombstone if the server deleted it).
    async fn read_node(&self, node: &Node) -> Result<Node>;

    /// Peers visible to `identity` on `network`.
    async fn get_peers(&self, identity: &str, network: &str) -> Result<Vec<PeerView>>;

    /// External clients attached to the ingress gateway `identity`.
    async fn get_ext_peers(&self, identity: &str, network: &str) -> Result<Vec<ExtPeerView>>;

    /// Remove the node's membership. Client-initiated, so no tombstone.
    async fn delete_node(&self, node: &Node) -> Result<()>;

    /// Lightweight reachability probe.
    async fn ping(&self) -> Result<()>;
}
