//! WgMesh Daemon Library
//!
//! The mesh control plane: node lifecycle, peer resolution and the HTTP API
//! that serves them.

pub mod api;
pub mod auth;
pub mod config;
pub mod extclient;
pub mod holepunch;
pub mod lifecycle;
pub mod network;
pub mod resolver;
pub mod service;
pub mod state;

pub use api::router;
pub use config::DaemonConfig;
pub use service::LocalNodeService;
pub use state::StateManager;

use tracing::info;

/// Prepare the store for serving: the comms network exists and the server
/// has a node in every network.
pub fn bootstrap(state: &StateManager) -> wgmesh_common::Result<()> {
    network::ensure_comms_network(state)?;
    for net in state.list_networks()? {
        let server = lifecycle::ensure_server_node(state, &net)?;
        info!("Serving network {} as {}", net.net_id, server.address);
    }
    Ok(())
}
