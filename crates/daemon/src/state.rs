//! State management for the daemon
//!
//! Typed access to the record store. Every read decodes a fresh snapshot;
//! nothing derived from node records is cached here.

use crate::config::DaemonConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use wgmesh_common::store::{
    record_key, DELETED_NODES_TABLE, EXT_CLIENTS_TABLE, NETWORKS_TABLE, NODES_TABLE,
};
use wgmesh_common::{Database, ExtClient, Network, Node, RecordStore, Result, WgKey, WgKeyPair};

/// Daemon-private records
pub const SERVER_TABLE: &str = "server";
const SERVER_KEY_RECORD: &str = "wireguard_key";

/// State manager shared by the API handlers
#[derive(Clone)]
pub struct StateManager {
    config: Arc<DaemonConfig>,
    store: Arc<dyn RecordStore>,
}

impl StateManager {
    /// Open the SQLite store under the configured store path
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.store_path)?;
        let db = Database::open(config.db_path())?;
        Ok(Self::with_store(config.clone(), Arc::new(db)))
    }

    /// Build on an existing store
    pub fn with_store(config: DaemonConfig, store: Arc<dyn RecordStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    /// In-memory state for tests
    #[cfg(test)]
    pub fn in_memory() -> Self {
        let db = Database::open_memory().expect("in-memory database");
        Self::with_store(DaemonConfig::default(), Arc::new(db))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Every decodable live node. Undecodable records are skipped.
    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        self.list_table(NODES_TABLE)
    }

    pub fn list_network_nodes(&self, network: &str) -> Result<Vec<Node>> {
        Ok(self
            .list_nodes()?
            .into_iter()
            .filter(|n| n.network == network)
            .collect())
    }

    pub fn get_live_node(&self, key: &str) -> Result<Node> {
        self.get_record(NODES_TABLE, key)
    }

    pub fn get_tombstone(&self, key: &str) -> Result<Node> {
        self.get_record(DELETED_NODES_TABLE, key)
    }

    pub fn put_node(&self, node: &Node) -> Result<()> {
        self.put_record(NODES_TABLE, &node.key()?, node)
    }

    pub fn put_tombstone(&self, node: &Node) -> Result<()> {
        self.put_record(DELETED_NODES_TABLE, &node.key()?, node)
    }

    // ========================================================================
    // Networks
    // ========================================================================

    pub fn list_networks(&self) -> Result<Vec<Network>> {
        self.list_table(NETWORKS_TABLE)
    }

    pub fn get_network(&self, net_id: &str) -> Result<Network> {
        self.get_record(NETWORKS_TABLE, net_id)
    }

    pub fn put_network(&self, network: &Network) -> Result<()> {
        self.put_record(NETWORKS_TABLE, &network.net_id, network)
    }

    /// Advance a network's node modification stamp.
    pub fn touch_nodes(&self, net_id: &str) -> Result<()> {
        let mut network = self.get_network(net_id)?;
        network.touch_nodes();
        self.put_network(&network)
    }

    // ========================================================================
    // External clients
    // ========================================================================

    pub fn list_ext_clients(&self) -> Result<Vec<ExtClient>> {
        self.list_table(EXT_CLIENTS_TABLE)
    }

    pub fn get_ext_client(&self, client_id: &str, network: &str) -> Result<ExtClient> {
        self.get_record(EXT_CLIENTS_TABLE, &record_key(client_id, network)?)
    }

    pub fn put_ext_client(&self, client: &ExtClient) -> Result<()> {
        let key = record_key(&client.client_id, &client.network)?;
        self.put_record(EXT_CLIENTS_TABLE, &key, client)
    }

    // ========================================================================
    // Server identity
    // ========================================================================

    /// WireGuard key pair of the server's own nodes, generated on first use.
    pub fn server_keypair(&self) -> Result<WgKeyPair> {
        match self.store.fetch_one(SERVER_TABLE, SERVER_KEY_RECORD) {
            Ok(encoded) => {
                let private_key: WgKey = encoded.parse()?;
                Ok(WgKeyPair::from_private(private_key))
            }
            Err(e) if e.is_not_found() => {
                let pair = wgmesh_common::crypto::generate_keypair();
                self.store.insert(
                    SERVER_TABLE,
                    SERVER_KEY_RECORD,
                    &pair.private_key.to_base64(),
                )?;
                info!("Generated server WireGuard key {}", pair.public_key);
                Ok(pair)
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn list_table<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let records = self.store.fetch_all(table)?;
        let mut items = Vec::with_capacity(records.len());
        for (key, value) in records {
            match serde_json::from_str(&value) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping undecodable {} record {}: {}", table, key, e),
            }
        }
        Ok(items)
    }

    fn get_record<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<T> {
        let value = self.store.fetch_one(table, key)?;
        Ok(serde_json::from_str(&value)?)
    }

    fn put_record<T: Serialize>(&self, table: &str, key: &str, item: &T) -> Result<()> {
        let value = serde_json::to_string(item)?;
        self.store.insert(table, key, &value)
    }
}
