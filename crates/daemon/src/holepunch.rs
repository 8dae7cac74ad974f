//! Hole-punch registry
//!
//! One map per network from WireGuard public key to the last observed
//! `host:port`. A side channel writes it; the resolver only reads it, and
//! treats a missing or malformed entry as "no override".

use crate::state::StateManager;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;
use wgmesh_common::store::PEERS_TABLE;
use wgmesh_common::{Error, Result};

/// Public key to observed endpoint
pub type EndpointMap = HashMap<String, String>;

/// The network's registry. A network without one yields an empty map.
pub fn endpoint_map(state: &StateManager, network: &str) -> Result<EndpointMap> {
    match state.store().fetch_one(PEERS_TABLE, network) {
        Ok(value) => Ok(serde_json::from_str(&value)?),
        Err(e) if e.is_not_found() => Ok(EndpointMap::new()),
        Err(e) => Err(e),
    }
}

/// Record a live endpoint observed for `public_key`.
pub fn record_endpoint(
    state: &StateManager,
    network: &str,
    public_key: &str,
    endpoint: &str,
) -> Result<()> {
    if lookup_entry(endpoint).is_none() {
        return Err(Error::Malformed(format!(
            "hole-punch endpoint {endpoint:?} is not host:port"
        )));
    }
    let mut map = endpoint_map(state, network)?;
    map.insert(public_key.to_string(), endpoint.to_string());
    state
        .store()
        .insert(PEERS_TABLE, network, &serde_json::to_string(&map)?)?;
    debug!("Recorded hole-punch endpoint {} for {}", endpoint, public_key);
    Ok(())
}

/// Observed `(host, port)` for a key, if the entry is well-formed.
pub fn lookup(map: &EndpointMap, public_key: &str) -> Option<(String, u16)> {
    map.get(public_key).and_then(|entry| lookup_entry(entry))
}

fn lookup_entry(entry: &str) -> Option<(String, u16)> {
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Some((addr.ip().to_string(), addr.port()));
    }
    let (host, port) = entry.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    if host.is_empty() || host.contains(':') {
        return None;
    }
    Some((host.to_string(), port))
}
