//! Membership synchronisation
//!
//! Each network membership moves through
//! `Unjoined -> Joining -> Joined -> Leaving -> Unjoined`. Joining any
//! network first makes sure the node is a member of the comms network, which
//! carries the control-plane traffic later pulls rely on.
//!
//! Local state is only replaced after a remote response has been fully
//! decoded and translated, so a failed or slow call never leaves a
//! half-applied configuration behind.

use crate::config::{ClientConfig, ConfigStore, ServerConfig};
use crate::interface::InterfaceApplier;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use wgmesh_common::crypto::{generate_keypair, generate_secret};
use wgmesh_common::peerconfig::{build_peer_configs, TranslateOptions};
use wgmesh_common::{Error, Node, NodeService, Result};

/// Selector meaning "every locally known network"
pub const ALL_NETWORKS: &str = "all";

/// Where a membership stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Unjoined,
    Joining,
    Joined,
    Leaving,
}

/// Result of pulling one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Interface updated with this many peers
    Applied { peers: usize },
    /// The server deleted the node; local state was removed
    Removed,
}

/// Result of pulling several networks
#[derive(Debug, Default)]
pub struct PullReport {
    pub pulled: Vec<(String, PullOutcome)>,
    pub failed: Vec<String>,
    pub last_error: Option<Error>,
}

impl PullReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives join, check-in, pull and leave for the local node
pub struct SyncClient<S, A> {
    service: S,
    applier: A,
    store: ConfigStore,
    server: ServerConfig,
    in_flight: Mutex<HashMap<String, MembershipState>>,
}

impl<S: NodeService, A: InterfaceApplier> SyncClient<S, A> {
    pub fn new(service: S, applier: A, store: ConfigStore, server: ServerConfig) -> Self {
        Self {
            service,
            applier,
            store,
            server,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Current state of a membership
    pub fn state(&self, network: &str) -> MembershipState {
        if let Some(state) = self.in_flight.lock().get(network) {
            return *state;
        }
        if self.store.exists(network) {
            MembershipState::Joined
        } else {
            MembershipState::Unjoined
        }
    }

    fn set_state(&self, network: &str, state: MembershipState) {
        debug!("{}: {:?}", network, state);
        let mut in_flight = self.in_flight.lock();
        match state {
            MembershipState::Joining | MembershipState::Leaving => {
                in_flight.insert(network.to_string(), state);
            }
            MembershipState::Joined | MembershipState::Unjoined => {
                in_flight.remove(network);
            }
        }
    }

    // ========================================================================
    // Join
    // ========================================================================

    /// Join `template.network`, joining the comms network first.
    ///
    /// A join that fails is rolled back: the membership is left if it got
    /// far enough to have local state, otherwise local artifacts are wiped.
    /// Being already installed counts as success.
    pub async fn join(&self, template: Node) -> Result<()> {
        let network = template.network.clone();
        if network.is_empty() || template.mac_address.is_empty() {
            return Err(Error::Malformed(
                "join needs a network and a node identity".to_string(),
            ));
        }

        if network != self.server.comms_network {
            self.ensure_comms(&template).await?;
        }

        match self.join_network(template).await {
            Ok(()) => Ok(()),
            Err(Error::AlreadyInstalled(net)) => {
                info!("Already joined {}", net);
                Ok(())
            }
            Err(e) => {
                self.rollback(&network, &e).await;
                Err(e)
            }
        }
    }

    /// Undo a failed join: leave if possible, else wipe local artifacts.
    async fn rollback(&self, network: &str, cause: &Error) {
        warn!("Join of {} failed, rolling back: {}", network, cause);
        if let Err(leave_err) = self.leave_network(network).await {
            debug!("Rollback leave of {} failed: {}", network, leave_err);
            self.wipe_local(network);
        }
        self.set_state(network, MembershipState::Unjoined);
    }

    async fn ensure_comms(&self, template: &Node) -> Result<()> {
        let comms = self.server.comms_network.clone();
        if !self.store.exists(&comms) {
            info!("Joining comms network {}", comms);
            let mut node = template.clone();
            node.network = comms.clone();
            return match self.join_network(node).await {
                Ok(()) | Err(Error::AlreadyInstalled(_)) => Ok(()),
                Err(e) => {
                    self.rollback(&comms, &e).await;
                    Err(e)
                }
            };
        }

        if let Err(e) = self.service.ping().await {
            warn!("Comms probe failed ({}), pulling {}", e, comms);
            self.pull(&comms).await?;
        }
        Ok(())
    }

    async fn join_network(&self, template: Node) -> Result<()> {
        let network = template.network.clone();
        if self.store.exists(&network) {
            return Err(Error::AlreadyInstalled(network));
        }
        self.set_state(&network, MembershipState::Joining);

        let keys = generate_keypair();
        let mut node = template;
        node.public_key = keys.public_key.to_base64();
        if node.password.is_empty() {
            node.password = generate_secret();
        }
        let secret = node.password.clone();

        let mut created = self.service.create_node(&node).await?;
        created.password = secret;

        self.store.save_private_key(&network, &keys.private_key)?;
        self.store.save(&ClientConfig {
            server: self.server.clone(),
            node: created,
        })?;
        info!("Joined {} as {}", network, node.mac_address);

        self.pull(&network).await?;
        self.set_state(&network, MembershipState::Joined);
        Ok(())
    }

    // ========================================================================
    // Check-in and pull
    // ========================================================================

    /// Refresh the local node record from the server.
    ///
    /// Server nodes are the authority for their own record and skip the
    /// round trip.
    pub async fn check_in(&self, network: &str) -> Result<Node> {
        let config = self.store.load(network)?;
        if config.node.is_server {
            return Ok(config.node);
        }

        let mut record = self.service.read_node(&config.node).await?;
        record.password = config.node.password.clone();
        if record.is_deleted() {
            info!("{} was removed by the server", network);
            self.remove_local(network, &config.node)?;
            return Ok(record);
        }

        self.store.save(&ClientConfig {
            server: config.server,
            node: record.clone(),
        })?;
        Ok(record)
    }

    /// Fetch the node record and peers for `network` and apply them.
    pub async fn pull(&self, network: &str) -> Result<PullOutcome> {
        let config = self.store.load(network)?;

        let node = if config.node.is_server {
            config.node.clone()
        } else {
            let mut record = self.service.read_node(&config.node).await?;
            record.password = config.node.password.clone();
            record
        };
        if node.is_deleted() {
            info!("{} was removed by the server", network);
            self.remove_local(network, &config.node)?;
            return Ok(PullOutcome::Removed);
        }

        let peers = self.service.get_peers(&node.mac_address, network).await?;
        let ext_peers = if node.is_ingress_gateway {
            match self.service.get_ext_peers(&node.mac_address, network).await {
                Ok(ext) => ext,
                Err(e) => {
                    warn!("Could not fetch ext clients for {}: {}", network, e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let private_key = self.store.load_private_key(network)?;
        let set = build_peer_configs(&node, &peers, &ext_peers, TranslateOptions::for_node(&node))?;

        self.applier.apply(&node, &private_key, &set)?;
        self.store.save(&ClientConfig {
            server: config.server,
            node,
        })?;
        debug!("Pulled {}: {} peers", network, set.peers.len());
        Ok(PullOutcome::Applied {
            peers: set.peers.len(),
        })
    }

    /// Pull one network, or every known network for [`ALL_NETWORKS`].
    ///
    /// With the wildcard each network is pulled independently; failures are
    /// recorded and the rest still run.
    pub async fn pull_selected(&self, selector: &str) -> Result<PullReport> {
        if selector != ALL_NETWORKS {
            let outcome = self.pull(selector).await?;
            return Ok(PullReport {
                pulled: vec![(selector.to_string(), outcome)],
                ..Default::default()
            });
        }

        let mut report = PullReport::default();
        for network in self.store.networks()? {
            match self.pull(&network).await {
                Ok(outcome) => report.pulled.push((network, outcome)),
                Err(e) => {
                    warn!("Pull of {} failed: {}", network, e);
                    report.failed.push(network);
                    report.last_error = Some(e);
                }
            }
        }
        Ok(report)
    }

    // ========================================================================
    // Leave
    // ========================================================================

    /// Leave `network`. If only the comms network remains afterwards, leave
    /// it too.
    pub async fn leave(&self, network: &str) -> Result<()> {
        self.leave_network(network).await?;

        let remaining = self.store.networks()?;
        if remaining.len() == 1 && remaining[0] == self.server.comms_network {
            info!("Only the comms network remains, leaving it");
            self.leave_network(&self.server.comms_network).await?;
        }
        Ok(())
    }

    async fn leave_network(&self, network: &str) -> Result<()> {
        let config = self.store.load(network)?;
        self.set_state(network, MembershipState::Leaving);

        if !config.node.is_server {
            match self.service.delete_node(&config.node).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!("{} already gone on the server", network),
                Err(e) => warn!("Server-side removal from {} failed: {}", network, e),
            }
        }

        self.remove_local(network, &config.node)?;
        info!("Left {}", network);
        Ok(())
    }

    fn remove_local(&self, network: &str, node: &Node) -> Result<()> {
        self.applier.remove(node)?;
        self.store.remove(network)?;
        self.set_state(network, MembershipState::Unjoined);
        Ok(())
    }

    /// Best-effort removal of whatever a failed join left behind
    fn wipe_local(&self, network: &str) {
        let node = self
            .store
            .load(network)
            .map(|c| c.node)
            .unwrap_or_else(|_| Node {
                network: network.to_string(),
                ..Default::default()
            });
        if let Err(e) = self.applier.remove(&node) {
            warn!("Could not remove interface config for {}: {}", network, e);
        }
        if let Err(e) = self.store.remove(network) {
            warn!("Could not remove local config for {}: {}", network, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use wgmesh_common::{ExtPeerView, NodeAction, PeerConfigSet, PeerView, WgKey};

    /// In-memory control plane
    #[derive(Default)]
    pub struct MockService {
        pub nodes: Mutex<HashMap<String, Node>>,
        pub failing: Mutex<HashSet<String>>,
        pub calls: Mutex<Vec<String>>,
        pub ping_fails: Mutex<bool>,
        pub create_error: Mutex<Option<Error>>,
    }

    impl MockService {
        fn check(&self, call: &str, network: &str) -> Result<()> {
            self.calls.lock().push(format!("{call}:{network}"));
            if self.failing.lock().contains(network) {
                return Err(Error::Transport(format!("{network} unreachable")));
            }
            Ok(())
        }

        pub fn count(&self, call: &str) -> usize {
            self.calls.lock().iter().filter(|c| c.starts_with(call)).count()
        }
    }

    #[async_trait]
    impl NodeService for MockService {
        async fn create_node(&self, node: &Node) -> Result<Node> {
            self.check("create", &node.network)?;
            if let Some(err) = self.create_error.lock().take() {
                return Err(err);
            }
            let mut nodes = self.nodes.lock();
            let mut created = node.clone();
            created.address = format!("10.0.0.{}", nodes.len() + 2);
            created.persistent_keepalive = 20;
            created.password.clear();
            nodes.insert(node.key()?, created.clone());
            Ok(created)
        }

        async fn read_node(&self, node: &Node) -> Result<Node> {
            self.check("read", &node.network)?;
            let mut record = self
                .nodes
                .lock()
                .get(&node.key()?)
                .cloned()
                .ok_or_else(|| Error::not_found("node", node.key().unwrap_or_default()))?;
            record.password.clear();
            Ok(record)
        }

        async fn get_peers(&self, identity: &str, network: &str) -> Result<Vec<PeerView>> {
            self.check("peers", network)?;
            Ok(self
                .nodes
                .lock()
                .values()
                .filter(|n| n.network == network && n.mac_address != identity)
                .map(PeerView::from)
                .collect())
        }

        async fn get_ext_peers(&self, _identity: &str, network: &str) -> Result<Vec<ExtPeerView>> {
            self.check("ext", network)?;
            Ok(Vec::new())
        }

        async fn delete_node(&self, node: &Node) -> Result<()> {
            self.check("delete", &node.network)?;
            self.nodes
                .lock()
                .remove(&node.key()?)
                .map(|_| ())
                .ok_or_else(|| Error::not_found("node", node.mac_address.clone()))
        }

        async fn ping(&self) -> Result<()> {
            self.calls.lock().push("ping".to_string());
            if *self.ping_fails.lock() {
                return Err(Error::Transport("probe timed out".to_string()));
            }
            Ok(())
        }
    }

    /// Records applied peer sets per network
    #[derive(Default)]
    pub struct MockApplier {
        pub applied: Mutex<HashMap<String, PeerConfigSet>>,
        pub removed: Mutex<Vec<String>>,
        pub fail: Mutex<bool>,
    }

    impl InterfaceApplier for MockApplier {
        fn apply(&self, node: &Node, _private_key: &WgKey, peers: &PeerConfigSet) -> Result<()> {
            if *self.fail.lock() {
                return Err(Error::Internal("device busy".to_string()));
            }
            self.applied.lock().insert(node.network.clone(), peers.clone());
            Ok(())
        }

        fn remove(&self, node: &Node) -> Result<()> {
            self.removed.lock().push(node.network.clone());
            self.applied.lock().remove(&node.network);
            Ok(())
        }
    }

    type Client = SyncClient<MockService, MockApplier>;

    fn client(dir: &tempfile::TempDir) -> Client {
        SyncClient::new(
            MockService::default(),
            MockApplier::default(),
            ConfigStore::new(dir.path()),
            ServerConfig::default(),
        )
    }

    fn template(network: &str) -> Node {
        Node {
            mac_address: "02:00:00:00:00:01".to_string(),
            network: network.to_string(),
            endpoint: "198.51.100.7".to_string(),
            listen_port: 51821,
            ..Default::default()
        }
    }

    fn add_remote_peer(client: &Client, mac: &str, network: &str) {
        let peer = Node {
            mac_address: mac.to_string(),
            network: network.to_string(),
            public_key: generate_keypair().public_key.to_base64(),
            endpoint: "203.0.113.50".to_string(),
            listen_port: 51821,
            address: "10.0.0.50".to_string(),
            ..Default::default()
        };
        client.service.nodes.lock().insert(peer.key().unwrap(), peer);
    }

    #[tokio::test]
    async fn test_join_joins_comms_first() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);

        client.join(template("mesh")).await.unwrap();

        assert_eq!(client.store.networks().unwrap(), vec!["comms", "mesh"]);
        let calls = client.service.calls.lock().clone();
        assert_eq!(calls[0], "create:comms");
        assert!(calls.contains(&"create:mesh".to_string()));
        assert_eq!(client.state("mesh"), MembershipState::Joined);

        // Plaintext credential kept locally, never echoed by the server
        let config = client.store.load("mesh").unwrap();
        assert!(!config.node.password.is_empty());
        assert!(client.applier.applied.lock().contains_key("mesh"));
    }

    #[tokio::test]
    async fn test_existing_comms_is_probed_not_rejoined() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.join(template("mesh")).await.unwrap();

        client.join(template("office")).await.unwrap();
        assert_eq!(client.service.count("create:comms"), 1);
        assert_eq!(client.service.count("ping"), 1);

        // A failed probe falls back to a full pull of comms
        *client.service.ping_fails.lock() = true;
        let reads_before = client.service.count("read:comms");
        client.join(template("lab")).await.unwrap();
        assert_eq!(client.service.count("read:comms"), reads_before + 1);
    }

    #[tokio::test]
    async fn test_join_twice_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.join(template("mesh")).await.unwrap();
        client.join(template("mesh")).await.unwrap();
        assert_eq!(client.service.count("create:mesh"), 1);
    }

    #[tokio::test]
    async fn test_failed_join_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.join(template("mesh")).await.unwrap();

        // Remote creation succeeds but applying the interface fails
        *client.applier.fail.lock() = true;
        let err = client.join(template("office")).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(!client.store.exists("office"));
        assert_eq!(client.state("office"), MembershipState::Unjoined);
        assert_eq!(client.service.count("delete:office"), 1);

        // Remote creation fails outright: nothing to leave, local wiped
        *client.applier.fail.lock() = false;
        *client.service.create_error.lock() = Some(Error::PolicyViolation("pool exhausted".into()));
        assert!(client.join(template("lab")).await.is_err());
        assert!(!client.store.exists("lab"));
        assert_eq!(client.store.networks().unwrap(), vec!["comms", "mesh"]);
    }

    #[tokio::test]
    async fn test_failed_comms_join_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        *client.applier.fail.lock() = true;

        assert!(client.join(template("mesh")).await.is_err());
        assert!(!client.store.exists("comms"));
        assert_eq!(client.state("comms"), MembershipState::Unjoined);
        assert!(client.service.nodes.lock().is_empty());
        assert_eq!(client.service.count("create:mesh"), 0);

        // A later join starts from scratch instead of probing a half-installed comms
        *client.applier.fail.lock() = false;
        client.join(template("mesh")).await.unwrap();
        assert_eq!(client.service.count("create:comms"), 2);
        assert_eq!(client.service.count("ping"), 0);
        assert_eq!(client.state("comms"), MembershipState::Joined);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_join() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.service.failing.lock().insert("mesh".to_string());

        let err = client.join(template("mesh")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!client.store.exists("mesh"));
    }

    #[tokio::test]
    async fn test_pull_all_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.join(template("mesh")).await.unwrap();
        client.join(template("office")).await.unwrap();
        add_remote_peer(&client, "peer-1", "office");
        add_remote_peer(&client, "peer-2", "mesh");

        client.service.failing.lock().insert("mesh".to_string());
        let report = client.pull_selected(ALL_NETWORKS).await.unwrap();

        assert_eq!(report.failed, vec!["mesh".to_string()]);
        assert!(report.last_error.as_ref().unwrap().is_retryable());
        let pulled: Vec<&str> = report.pulled.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(pulled, vec!["comms", "office"]);

        let applied = client.applier.applied.lock();
        assert_eq!(applied["office"].peers.len(), 1);
        // The failed network keeps its previous configuration
        assert!(applied["mesh"].peers.is_empty());
    }

    #[tokio::test]
    async fn test_single_pull_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.join(template("mesh")).await.unwrap();
        client.service.failing.lock().insert("mesh".to_string());
        assert!(client.pull_selected("mesh").await.is_err());
        assert!(client.pull_selected("unknown").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_server_side_deletion_removes_local_state() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.join(template("mesh")).await.unwrap();

        let key = "02:00:00:00:00:01###mesh";
        client.service.nodes.lock().get_mut(key).unwrap().action = NodeAction::Delete;

        let outcome = client.pull("mesh").await.unwrap();
        assert_eq!(outcome, PullOutcome::Removed);
        assert!(!client.store.exists("mesh"));
        assert!(client.applier.removed.lock().contains(&"mesh".to_string()));
    }

    #[tokio::test]
    async fn test_check_in() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.join(template("mesh")).await.unwrap();
        let before = client.store.load("mesh").unwrap().node;

        let key = "02:00:00:00:00:01###mesh";
        client.service.nodes.lock().get_mut(key).unwrap().is_egress_gateway = true;

        let record = client.check_in("mesh").await.unwrap();
        assert!(record.is_egress_gateway);
        let after = client.store.load("mesh").unwrap().node;
        assert!(after.is_egress_gateway);
        assert_eq!(after.password, before.password);
    }

    #[tokio::test]
    async fn test_server_node_skips_remote_check_in() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        let mut node = template("mesh");
        node.is_server = true;
        client
            .store
            .save(&ClientConfig {
                server: ServerConfig::default(),
                node: node.clone(),
            })
            .unwrap();

        let record = client.check_in("mesh").await.unwrap();
        assert_eq!(record, node);
        assert_eq!(client.service.count("read"), 0);
    }

    #[tokio::test]
    async fn test_leave_drops_comms_when_last() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.join(template("mesh")).await.unwrap();
        client.join(template("office")).await.unwrap();

        client.leave("mesh").await.unwrap();
        assert_eq!(client.store.networks().unwrap(), vec!["comms", "office"]);

        client.leave("office").await.unwrap();
        assert!(client.store.networks().unwrap().is_empty());
        assert!(client.service.nodes.lock().is_empty());
        assert!(client.leave("office").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_leave_survives_unreachable_server() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        client.join(template("mesh")).await.unwrap();
        client.service.failing.lock().insert("mesh".to_string());

        client.leave("mesh").await.unwrap();
        assert!(!client.store.exists("mesh"));
    }
}
