//! WgMesh Common Library
//!
//! Shared types, peer translation, and storage for the WgMesh control plane
//! and client.

pub mod crypto;
pub mod db;
pub mod error;
pub mod peer;
pub mod peerconfig;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use crypto::{WgKey, WgKeyPair};
pub use db::Database;
pub use error::{Error, Result};
pub use peer::{ExtPeerView, PeerView};
pub use peerconfig::{build_peer_configs, PeerConfig, PeerConfigSet, TranslateOptions};
pub use service::{NodeService, Object, ObjectKind};
pub use store::RecordStore;
pub use types::*;

/// WgMesh version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".wgmesh")
}

/// Default client configuration directory
pub fn default_client_dir() -> std::path::PathBuf {
    default_store_path().join("networks")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
