//! Interface reconciliation
//!
//! Applying a peer set to a live WireGuard device is platform work outside
//! this crate. The default applier writes a wg-quick configuration per
//! network that `wg-quick` or `wg syncconf` can consume.

use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;
use wgmesh_common::{Node, PeerConfigSet, Result, WgKey};

/// Applies translated peer sets to a local interface
pub trait InterfaceApplier: Send + Sync {
    /// Replace the interface configuration for `node`'s network
    fn apply(&self, node: &Node, private_key: &WgKey, peers: &PeerConfigSet) -> Result<()>;

    /// Tear down whatever `apply` set up
    fn remove(&self, node: &Node) -> Result<()>;
}

/// Writes `<dir>/<interface>.conf`
#[derive(Debug, Clone)]
pub struct WgQuickWriter {
    dir: PathBuf,
}

impl WgQuickWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, node: &Node) -> PathBuf {
        let name = if node.interface.is_empty() {
            &node.network
        } else {
            &node.interface
        };
        self.dir.join(format!("{name}.conf"))
    }
}

/// Render a wg-quick configuration
pub fn render_config(node: &Node, private_key: &WgKey, peers: &PeerConfigSet) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# WireGuard configuration for {} on {}", node.name, node.network);
    let _ = writeln!(out, "# Generated by wgmesh");
    let _ = writeln!(out);
    let _ = writeln!(out, "[Interface]");
    let _ = writeln!(out, "PrivateKey = {}", private_key.to_base64());

    let mut addresses = vec![format!("{}/32", node.address)];
    if node.is_dual_stack {
        if let Some(address6) = &node.address6 {
            addresses.push(format!("{address6}/128"));
        }
    }
    let _ = writeln!(out, "Address = {}", addresses.join(", "));
    if node.listen_port != 0 {
        let _ = writeln!(out, "ListenPort = {}", node.listen_port);
    }
    if peers.has_gateway {
        let _ = writeln!(out, "# Gateway ranges: {}", peers.gateway_ranges.join(", "));
    }

    for peer in &peers.peers {
        let allowed: Vec<String> = peer.allowed_ips.iter().map(|n| n.to_string()).collect();
        let _ = writeln!(out);
        let _ = writeln!(out, "[Peer]");
        let _ = writeln!(out, "PublicKey = {}", peer.public_key);
        let _ = writeln!(out, "AllowedIPs = {}", allowed.join(", "));
        if let Some(endpoint) = peer.endpoint {
            let _ = writeln!(out, "Endpoint = {endpoint}");
        }
        if let Some(keepalive) = peer.persistent_keepalive {
            let _ = writeln!(out, "PersistentKeepalive = {keepalive}");
        }
    }
    out
}

impl InterfaceApplier for WgQuickWriter {
    fn apply(&self, node: &Node, private_key: &WgKey, peers: &PeerConfigSet) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(node);
        let tmp = path.with_extension("conf.tmp");
        std::fs::write(&tmp, render_config(node, private_key, peers))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &path)?;
        info!(
            "Wrote {} with {} peers",
            path.display(),
            peers.peers.len()
        );
        Ok(())
    }

    fn remove(&self, node: &Node) -> Result<()> {
        match std::fs::remove_file(self.path(node)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
