//! CLI Commands

pub mod agent;
pub mod join;
pub mod leave;
pub mod list;
pub mod pull;

use crate::client::HttpNodeService;
use crate::config::{ConfigStore, ServerConfig};
use crate::interface::WgQuickWriter;
use crate::output::OutputFormat;
use crate::sync::SyncClient;
use anyhow::Result;
use std::path::PathBuf;

/// Client used by every command
pub type Client = SyncClient<HttpNodeService, WgQuickWriter>;

/// Settings shared by all commands
#[derive(Debug, Clone)]
pub struct Context {
    pub config_dir: PathBuf,
    pub interface_dir: PathBuf,
    /// Overrides the server recorded in existing memberships
    pub server_addr: Option<String>,
    pub access_token: Option<String>,
    pub format: OutputFormat,
}

impl Context {
    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(&self.config_dir)
    }

    /// Server settings: command-line overrides on top of the first existing
    /// membership, or defaults when there is none.
    pub fn server(&self) -> ServerConfig {
        let store = self.store();
        let mut server = store
            .networks()
            .unwrap_or_default()
            .first()
            .and_then(|n| store.load(n).ok())
            .map(|c| c.server)
            .unwrap_or_default();
        if let Some(addr) = &self.server_addr {
            server.api_addr = addr.clone();
        }
        if let Some(token) = &self.access_token {
            server.access_token = Some(token.clone());
        }
        server
    }

    pub fn client(&self) -> Result<Client> {
        let server = self.server();
        let service = HttpNodeService::new(&server)?;
        Ok(SyncClient::new(
            service,
            WgQuickWriter::new(&self.interface_dir),
            self.store(),
            server,
        ))
    }
}
