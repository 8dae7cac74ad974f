//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use wgmesh_common::{DEFAULT_LISTEN_PORT, SERVER_NODE_NAME};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// HTTP API listen address
    pub listen: String,

    /// Bearer token required on `/api` routes. Unset disables the check.
    pub access_token: Option<String>,

    /// Enable endpoint overrides from the hole-punch registry
    pub hole_punch: bool,

    /// The node this server runs for itself in every network
    pub server: ServerNodeConfig,

    /// Bootstrap network carrying control-plane traffic
    pub comms: CommsConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: wgmesh_common::default_store_path(),
            listen: "127.0.0.1:8081".to_string(),
            access_token: None,
            hole_punch: true,
            server: ServerNodeConfig::default(),
            comms: CommsConfig::default(),
        }
    }
}

/// Server node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerNodeConfig {
    /// Identity used for the server's node records
    pub identity: String,

    /// Public IP peers use to reach the server
    pub endpoint: String,

    /// WireGuard listen port
    pub listen_port: u16,
}

impl Default for ServerNodeConfig {
    fn default() -> Self {
        Self {
            identity: SERVER_NODE_NAME.to_string(),
            endpoint: "127.0.0.1".to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
        }
    }
}

/// Comms network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommsConfig {
    pub net_id: String,
    pub address_range: String,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            net_id: "comms".to_string(),
            address_range: "10.101.0.0/16".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }
}
