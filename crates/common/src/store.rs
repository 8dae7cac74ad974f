//! Record store adapter
//!
//! The control plane keeps every document (nodes, tombstones, networks, ext
//! clients, hole-punch maps) as a JSON string under a string key in a named
//! table. Anything that can fetch, insert and delete by key can back it.

use crate::{Error, Result};

/// Live node records, keyed by `identity###network`.
pub const NODES_TABLE: &str = "nodes";
/// Tombstones for nodes removed by the server, same key as the live record.
pub const DELETED_NODES_TABLE: &str = "deleted_nodes";
/// Network documents keyed by net id.
pub const NETWORKS_TABLE: &str = "networks";
/// External clients keyed by `client_id###network`.
pub const EXT_CLIENTS_TABLE: &str = "ext_clients";
/// Hole-punch endpoint maps keyed by net id.
pub const PEERS_TABLE: &str = "peers";

/// Separator between identity and network in record keys.
pub const KEY_SEPARATOR: &str = "###";

/// Key/value record store
pub trait RecordStore: Send + Sync {
    /// All records in a table. An empty table yields an empty list.
    fn fetch_all(&self, table: &str) -> Result<Vec<(String, String)>>;

    /// One record. Absent records yield `Error::NotFound`.
    fn fetch_one(&self, table: &str, key: &str) -> Result<String>;

    /// Insert or replace a record.
    fn insert(&self, table: &str, key: &str, value: &str) -> Result<()>;

    /// Remove a record. Removing an absent record yields `Error::NotFound`.
    fn delete(&self, table: &str, key: &str) -> Result<()>;
}

/// Build the store key for a node.
pub fn record_key(identity: &str, network: &str) -> Result<String> {
    if identity.is_empty() || network.is_empty() {
        return Err(Error::Malformed(
            "unable to get record key: identity and network are required".to_string(),
        ));
    }
    Ok(format!("{identity}{KEY_SEPARATOR}{network}"))
}

/// Split a `identity###network` key.
pub fn split_record_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once(KEY_SEPARATOR) {
        Some((identity, network)) if !identity.is_empty() && !network.is_empty() => {
            Ok((identity, network))
        }
        _ => Err(Error::Malformed(format!("invalid record key: {key}"))),
    }
}
