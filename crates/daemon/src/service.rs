//! Node service backed directly by the store
//!
//! This is the remote-facing wrapper around the resolvers: it authenticates
//! check-ins, picks the resolution mode from the requester's role and drops
//! the requester from its own peer list.

use crate::lifecycle;
use crate::resolver::{self, ResolveMode};
use crate::state::StateManager;
use async_trait::async_trait;
use tracing::{debug, info};
use wgmesh_common::crypto::verify_secret;
use wgmesh_common::store::record_key;
use wgmesh_common::{Error, ExtPeerView, Node, NodeService, PeerView, Result};

/// In-process `NodeService`
#[derive(Clone)]
pub struct LocalNodeService {
    state: StateManager,
}

impl LocalNodeService {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    fn authenticate(&self, presented: &Node, stored: &Node) -> Result<()> {
        if stored.is_server {
            return Ok(());
        }
        if verify_secret(&presented.password, &stored.password) {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "invalid credential for {}",
                presented.mac_address
            )))
        }
    }
}

/// Copy of a record safe to hand back to its owner
fn redacted(mut node: Node) -> Node {
    node.password.clear();
    node
}

#[async_trait]
impl NodeService for LocalNodeService {
    async fn create_node(&self, node: &Node) -> Result<Node> {
        let mut node = node.clone();
        // Only the daemon creates server nodes
        node.is_server = false;
        let created = lifecycle::create_node(&self.state, node)?;
        Ok(redacted(created))
    }

    async fn read_node(&self, node: &Node) -> Result<Node> {
        let key = node.key()?;
        let mut stored = lifecycle::get_node(&self.state, &key)?;
        self.authenticate(node, &stored)?;

        if stored.is_deleted() {
            info!("Node {} checked in after deletion", key);
            return Ok(redacted(stored));
        }

        let mut changed = false;
        if !node.endpoint.is_empty() && node.endpoint != stored.endpoint {
            stored.endpoint = node.endpoint.clone();
            changed = true;
        }
        if node.listen_port != 0 && node.listen_port != stored.listen_port {
            stored.listen_port = node.listen_port;
            changed = true;
        }
        if node.local_address.is_some() && node.local_address != stored.local_address {
            stored.local_address = node.local_address.clone();
            changed = true;
        }
        if !node.public_key.is_empty() && node.public_key != stored.public_key {
            stored.public_key = node.public_key.clone();
            changed = true;
        }

        stored.last_check_in = chrono::Utc::now().timestamp();
        if changed {
            stored.last_modified = stored.last_check_in;
        }
        self.state.put_node(&stored)?;
        if changed {
            self.state.touch_nodes(&stored.network)?;
            debug!("Node {} reported new connection details", key);
        }
        Ok(redacted(stored))
    }

    async fn get_peers(&self, identity: &str, network: &str) -> Result<Vec<PeerView>> {
        let requester = self.state.get_live_node(&record_key(identity, network)?)?;

        let mode = if requester.is_relayed {
            ResolveMode::RelayAnchored {
                relayed_address: &requester.address,
            }
        } else {
            ResolveMode::Plain {
                exclude_relayed: !requester.is_relay,
            }
        };

        let peers = resolver::resolve_peers(&self.state, network, mode)?
            .into_iter()
            .filter(|p| p.mac_address != identity)
            .collect();
        Ok(peers)
    }

    async fn get_ext_peers(&self, identity: &str, network: &str) -> Result<Vec<ExtPeerView>> {
        resolver::resolve_ext_peers(&self.state, identity, network)
    }

    async fn delete_node(&self, node: &Node) -> Result<()> {
        let key = node.key()?;
        let stored = lifecycle::get_node(&self.state, &key)?;
        self.authenticate(node, &stored)?;
        lifecycle::delete_node(&self.state, &key, true)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
