//! Local membership configuration
//!
//! One TOML file per joined network (`<dir>/<network>.toml`) plus its
//! WireGuard private key (`<dir>/<network>.key`). The set of config files is
//! the set of locally known networks.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use wgmesh_common::{Error, Node, Result, WgKey};

/// How to reach the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the daemon API
    pub api_addr: String,
    pub access_token: Option<String>,
    /// Bootstrap network joined before any other
    pub comms_network: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_addr: "http://127.0.0.1:8081".to_string(),
            access_token: None,
            comms_network: "comms".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Membership of one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub node: Node,
}

impl ClientConfig {
    pub fn network(&self) -> &str {
        &self.node.network
    }
}

/// Directory of per-network configs
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn config_path(&self, network: &str) -> PathBuf {
        self.dir.join(format!("{network}.toml"))
    }

    fn key_path(&self, network: &str) -> PathBuf {
        self.dir.join(format!("{network}.key"))
    }

    /// Locally known networks, sorted
    pub fn networks(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut networks = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                networks.push(stem.to_string());
            }
        }
        networks.sort();
        Ok(networks)
    }

    pub fn exists(&self, network: &str) -> bool {
        self.config_path(network).exists()
    }

    pub fn load(&self, network: &str) -> Result<ClientConfig> {
        let path = self.config_path(network);
        if !path.exists() {
            return Err(Error::not_found("network config", network));
        }
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Write a config. The previous file is only replaced once the new one
    /// is fully written.
    pub fn save(&self, config: &ClientConfig) -> Result<()> {
        let content = toml::to_string_pretty(config)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.config_path(config.network());
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        debug!("Saved config for {}", config.network());
        Ok(())
    }

    pub fn save_private_key(&self, network: &str, key: &WgKey) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.key_path(network);
        std::fs::write(&path, key.to_base64())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn load_private_key(&self, network: &str) -> Result<WgKey> {
        let path = self.key_path(network);
        if !path.exists() {
            return Err(Error::not_found("private key", network));
        }
        std::fs::read_to_string(&path)?.parse()
    }

    /// Remove everything stored for a network. Missing files are fine.
    pub fn remove(&self, network: &str) -> Result<()> {
        for path in [self.config_path(network), self.key_path(network)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!("Removed local state for {}", network);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgmesh_common::crypto::generate_keypair;

    fn config(network: &str) -> ClientConfig {
        ClientConfig {
            server: ServerConfig::default(),
            node: Node {
                mac_address: "02:00:00:00:00:01".to_string(),
                network: network.to_string(),
                address: "10.10.10.2".to_string(),
                relay_addrs: vec!["10.10.10.9".to_string()],
                local_address: Some("192.168.1.10".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_save_load_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("networks"));
        assert!(store.networks().unwrap().is_empty());

        store.save(&config("mesh")).unwrap();
        store.save(&config("comms")).unwrap();
        assert_eq!(store.networks().unwrap(), vec!["comms", "mesh"]);
        assert_eq!(store.load("mesh").unwrap(), config("mesh"));

        store.remove("mesh").unwrap();
        store.remove("mesh").unwrap();
        assert_eq!(store.networks().unwrap(), vec!["comms"]);
        assert!(store.load("mesh").unwrap_err().is_not_found());
    }

    #[test]
    fn test_private_key_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let pair = generate_keypair();

        store.save_private_key("mesh", &pair.private_key).unwrap();
        assert_eq!(store.load_private_key("mesh").unwrap(), pair.private_key);
        // Key files are not networks
        assert!(store.networks().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_config_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        std::fs::write(dir.path().join("mesh.toml"), "this is = = not toml").unwrap();
        assert!(matches!(store.load("mesh"), Err(Error::InvalidConfig(_))));
    }
}
