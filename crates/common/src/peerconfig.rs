//! Peer configuration translation
//!
//! Turns the peer views a node receives from the control plane into concrete
//! WireGuard peer entries: which key, which allowed IPs, which endpoint and
//! keepalive. This is where a node decides what it should actually connect
//! to, so self and duplicate-endpoint exclusion live here rather than in the
//! resolver.

use crate::crypto::WgKey;
use crate::peer::{ExtPeerView, PeerView};
use crate::types::Node;
use crate::Result;
use ipnetwork::IpNetwork;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

/// Keepalive a server node uses towards non-server peers
pub const SERVER_KEEPALIVE_SECS: u16 = 5;

/// One WireGuard peer entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerConfig {
    #[serde(serialize_with = "serialize_key")]
    pub public_key: WgKey,
    pub allowed_ips: Vec<IpNetwork>,
    pub endpoint: Option<SocketAddr>,
    pub persistent_keepalive: Option<u16>,
    pub replace_allowed_ips: bool,
}

fn serialize_key<S: serde::Serializer>(key: &WgKey, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&key.to_base64())
}

/// Result of translating a whole peer list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerConfigSet {
    pub peers: Vec<PeerConfig>,
    pub has_gateway: bool,
    pub gateway_ranges: Vec<String>,
}

/// Local policy knobs for translation
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslateOptions {
    pub dual_stack: bool,
    pub is_ingress_gateway: bool,
}

impl TranslateOptions {
    pub fn for_node(node: &Node) -> Self {
        Self {
            dual_stack: node.is_dual_stack,
            is_ingress_gateway: node.is_ingress_gateway,
        }
    }
}

/// Host part of an endpoint written either as `ip` or `ip:port`.
pub fn endpoint_host(endpoint: &str) -> Option<IpAddr> {
    let endpoint = endpoint.trim();
    endpoint
        .parse::<IpAddr>()
        .ok()
        .or_else(|| endpoint.parse::<SocketAddr>().ok().map(|sa| sa.ip()))
}

fn same_endpoint_host(a: &str, b: &str) -> bool {
    match (endpoint_host(a), endpoint_host(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn host_route(ip: IpAddr) -> IpNetwork {
    let prefix = if ip.is_ipv4() { 32 } else { 128 };
    // A full-length prefix is always valid for its address family
    IpNetwork::new(ip, prefix).unwrap_or_else(|_| IpNetwork::from(ip))
}

fn push_unique(allowed: &mut Vec<IpNetwork>, net: IpNetwork) {
    if !allowed.contains(&net) {
        allowed.push(net);
    }
}

/// Translate peer views into WireGuard peer entries for `local`.
///
/// A malformed public key on any candidate aborts the whole batch. Bad
/// allowed-IP entries and egress ranges are logged and skipped.
pub fn build_peer_configs(
    local: &Node,
    peers: &[PeerView],
    ext_peers: &[ExtPeerView],
    opts: TranslateOptions,
) -> Result<PeerConfigSet> {
    let mut set = PeerConfigSet::default();
    let local_lan = local
        .local_address
        .as_deref()
        .and_then(|addr| addr.parse::<IpAddr>().ok());

    for peer in peers {
        if peer.public_key == local.public_key {
            continue;
        }
        let public_key: WgKey = peer.public_key.parse()?;

        let mut endpoint = peer.endpoint.clone();
        if same_endpoint_host(&local.endpoint, &peer.endpoint) {
            match peer.local_address.as_deref() {
                Some(lan) if !lan.is_empty() && Some(lan) != local.local_address.as_deref() => {
                    debug!("peer {} shares our public endpoint, using {}", peer.mac_address, lan);
                    endpoint = lan.to_string();
                }
                _ => continue,
            }
        }
        let endpoint_ip = endpoint_host(&endpoint);

        let mut allowed_ips = Vec::new();
        let mesh_ip = peer.address.parse::<IpAddr>().ok();
        match mesh_ip {
            Some(ip) => allowed_ips.push(host_route(ip)),
            None => warn!("peer {} has invalid mesh address {:?}", peer.mac_address, peer.address),
        }

        for entry in &peer.allowed_ips {
            let entry = entry.trim();
            if entry.contains('/') {
                match entry.parse::<IpNetwork>() {
                    Ok(net) => {
                        let loops = endpoint_ip.map_or(false, |ip| net.contains(ip));
                        let duplicate = Some(net.network()) == mesh_ip;
                        if !loops && !duplicate {
                            push_unique(&mut allowed_ips, net);
                        }
                    }
                    Err(e) => warn!("skipping allowed ip {} for {}: {}", entry, peer.mac_address, e),
                }
            } else {
                match entry.parse::<IpAddr>() {
                    Ok(ip) if Some(ip) != mesh_ip => push_unique(&mut allowed_ips, host_route(ip)),
                    Ok(_) => {}
                    Err(e) => warn!("skipping allowed ip {} for {}: {}", entry, peer.mac_address, e),
                }
            }
        }

        if peer.is_egress_gateway {
            let public_ip = endpoint_host(&peer.endpoint);
            for range in &peer.egress_gateway_ranges {
                let net = match range.contains('/').then(|| range.parse::<IpNetwork>()) {
                    Some(Ok(net)) => net,
                    _ => {
                        warn!("could not parse gateway IP range, not adding {}", range);
                        continue;
                    }
                };
                if public_ip.map_or(false, |ip| net.contains(ip)) {
                    warn!(
                        "egress IP range of {} overlaps with {}, omitting",
                        range, peer.endpoint
                    );
                    continue;
                }
                if local_lan.map_or(false, |ip| net.contains(ip)) {
                    warn!(
                        "egress IP range of {} overlaps with local address {:?}, omitting",
                        range, local.local_address
                    );
                    continue;
                }
                push_unique(&mut allowed_ips, net);
                set.gateway_ranges.push(range.clone());
                set.has_gateway = true;
            }
        }

        if opts.dual_stack {
            if let Some(ip6) = peer.address6.as_deref().and_then(|a| a.parse::<IpAddr>().ok()) {
                push_unique(&mut allowed_ips, host_route(ip6));
            }
        }

        let socket = endpoint_ip.map(|ip| SocketAddr::new(ip, peer.listen_port));
        if socket.is_none() && !(local.is_server && !peer.is_server) {
            warn!("peer {} has no usable endpoint {:?}", peer.mac_address, endpoint);
        }

        let config = if local.is_server && !peer.is_server {
            PeerConfig {
                public_key,
                allowed_ips,
                endpoint: None,
                persistent_keepalive: Some(SERVER_KEEPALIVE_SECS),
                replace_allowed_ips: true,
            }
        } else if local.persistent_keepalive != 0 {
            PeerConfig {
                public_key,
                allowed_ips,
                endpoint: socket,
                persistent_keepalive: Some(local.persistent_keepalive),
                replace_allowed_ips: true,
            }
        } else {
            PeerConfig {
                public_key,
                allowed_ips,
                endpoint: socket,
                persistent_keepalive: None,
                replace_allowed_ips: true,
            }
        };
        set.peers.push(config);
    }

    if opts.is_ingress_gateway {
        for ext in ext_peers {
            if ext.public_key == local.public_key {
                continue;
            }
            let public_key: WgKey = ext.public_key.parse()?;

            let mut allowed_ips = Vec::new();
            match ext.address.parse::<IpAddr>() {
                Ok(ip) => allowed_ips.push(host_route(ip)),
                Err(_) => warn!("ext client {} has invalid address {:?}", ext.client_id, ext.address),
            }
            if opts.dual_stack {
                if let Some(ip6) = ext.address6.as_deref().and_then(|a| a.parse::<IpAddr>().ok()) {
                    push_unique(&mut allowed_ips, host_route(ip6));
                }
            }

            set.peers.push(PeerConfig {
                public_key,
                allowed_ips,
                endpoint: None,
                persistent_keepalive: None,
                replace_allowed_ips: true,
            });
        }
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;

    fn key() -> String {
        generate_keypair().public_key.to_base64()
    }

    fn node(endpoint: &str, local: &str, address: &str) -> Node {
        Node {
            mac_address: format!("mac-{address}"),
            network: "mesh".to_string(),
            public_key: key(),
            endpoint: endpoint.to_string(),
            listen_port: 51821,
            local_address: Some(local.to_string()),
            address: address.to_string(),
            persistent_keepalive: 20,
            ..Default::default()
        }
    }

    fn view(node: &Node) -> PeerView {
        PeerView::from(node)
    }

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    #[test]
    fn test_shared_public_host_uses_lan_address() {
        let a = node("1.2.3.4", "10.0.0.5", "10.10.10.2");
        let mut b = node("1.2.3.4", "10.0.0.6", "10.10.10.3");
        b.listen_port = 51822;

        let set = build_peer_configs(&a, &[view(&a), view(&b)], &[], TranslateOptions::default()).unwrap();
        assert_eq!(set.peers.len(), 1);
        let peer = &set.peers[0];
        assert_eq!(peer.endpoint, Some("10.0.0.6:51822".parse().unwrap()));
        assert_eq!(peer.allowed_ips, vec![net("10.10.10.3/32")]);
    }

    #[test]
    fn test_shared_endpoint_without_distinct_lan_is_skipped() {
        let a = node("1.2.3.4", "10.0.0.5", "10.10.10.2");
        let b = node("1.2.3.4", "10.0.0.5", "10.10.10.3");
        let mut c = node("1.2.3.4", "", "10.10.10.4");
        c.local_address = None;

        let set = build_peer_configs(&a, &[view(&b), view(&c)], &[], TranslateOptions::default()).unwrap();
        assert!(set.peers.is_empty());
    }

    #[test]
    fn test_self_is_excluded() {
        let a = node("1.2.3.4", "10.0.0.5", "10.10.10.2");
        let set = build_peer_configs(&a, &[view(&a)], &[], TranslateOptions::default()).unwrap();
        assert!(set.peers.is_empty());
    }

    #[test]
    fn test_egress_range_containing_gateway_endpoint_is_rejected() {
        let local = node("198.51.100.1", "192.168.1.10", "10.10.10.2");
        let mut gw = node("203.0.113.9", "172.20.0.2", "10.10.10.3");
        gw.is_egress_gateway = true;
        gw.egress_gateway_ranges = vec![
            "192.168.50.0/24".to_string(),
            "203.0.113.0/24".to_string(),
        ];

        let set = build_peer_configs(&local, &[view(&gw)], &[], TranslateOptions::default()).unwrap();
        assert!(set.has_gateway);
        assert_eq!(set.gateway_ranges, vec!["192.168.50.0/24".to_string()]);
        let allowed = &set.peers[0].allowed_ips;
        assert!(allowed.contains(&net("192.168.50.0/24")));
        assert!(!allowed.contains(&net("203.0.113.0/24")));
    }

    #[test]
    fn test_egress_range_containing_local_address_is_rejected() {
        let local = node("198.51.100.1", "192.168.50.20", "10.10.10.2");
        let mut gw = node("203.0.113.9", "172.20.0.2", "10.10.10.3");
        gw.is_egress_gateway = true;
        gw.egress_gateway_ranges = vec!["192.168.50.0/24".to_string(), "bogus".to_string()];

        let set = build_peer_configs(&local, &[view(&gw)], &[], TranslateOptions::default()).unwrap();
        assert!(!set.has_gateway);
        assert!(set.gateway_ranges.is_empty());
        assert_eq!(set.peers[0].allowed_ips, vec![net("10.10.10.3/32")]);
    }

    #[test]
    fn test_allowed_ip_filtering() {
        let local = node("198.51.100.1", "192.168.1.10", "10.10.10.2");
        let mut peer = node("203.0.113.9", "172.20.0.2", "10.10.10.3");
        peer.allowed_ips = vec![
            "172.16.0.0/16".to_string(),
            "203.0.113.0/24".to_string(), // contains the peer's endpoint
            "10.10.10.3/32".to_string(),  // duplicates the mesh address
            "10.10.10.3".to_string(),
            "10.99.0.1".to_string(),
            "not-an-ip".to_string(),
            "10.0.0.0/99".to_string(),
        ];

        let set = build_peer_configs(&local, &[view(&peer)], &[], TranslateOptions::default()).unwrap();
        assert_eq!(
            set.peers[0].allowed_ips,
            vec![net("10.10.10.3/32"), net("172.16.0.0/16"), net("10.99.0.1/32")]
        );
    }

    #[test]
    fn test_malformed_key_aborts_batch() {
        let local = node("198.51.100.1", "192.168.1.10", "10.10.10.2");
        let good = node("203.0.113.9", "172.20.0.2", "10.10.10.3");
        let mut bad = node("203.0.113.10", "172.20.0.3", "10.10.10.4");
        bad.public_key = "garbage".to_string();

        let err = build_peer_configs(&local, &[view(&good), view(&bad)], &[], TranslateOptions::default())
            .unwrap_err();
        assert!(matches!(err, crate::Error::Malformed(_)));
    }

    #[test]
    fn test_keepalive_policy() {
        let mut local = node("198.51.100.1", "192.168.1.10", "10.10.10.2");
        let peer = node("203.0.113.9", "172.20.0.2", "10.10.10.3");

        let set = build_peer_configs(&local, &[view(&peer)], &[], TranslateOptions::default()).unwrap();
        assert_eq!(set.peers[0].persistent_keepalive, Some(20));
        assert_eq!(set.peers[0].endpoint, Some("203.0.113.9:51821".parse().unwrap()));

        local.persistent_keepalive = 0;
        let set = build_peer_configs(&local, &[view(&peer)], &[], TranslateOptions::default()).unwrap();
        assert_eq!(set.peers[0].persistent_keepalive, None);
        assert!(set.peers[0].endpoint.is_some());

        local.is_server = true;
        let set = build_peer_configs(&local, &[view(&peer)], &[], TranslateOptions::default()).unwrap();
        assert_eq!(set.peers[0].persistent_keepalive, Some(SERVER_KEEPALIVE_SECS));
        assert_eq!(set.peers[0].endpoint, None);

        let mut other_server = peer.clone();
        other_server.is_server = true;
        let set = build_peer_configs(&local, &[view(&other_server)], &[], TranslateOptions::default()).unwrap();
        assert_eq!(set.peers[0].persistent_keepalive, None);
        assert!(set.peers[0].endpoint.is_some());
    }

    #[test]
    fn test_dual_stack_adds_v6_host_route() {
        let local = node("198.51.100.1", "192.168.1.10", "10.10.10.2");
        let mut peer = node("203.0.113.9", "172.20.0.2", "10.10.10.3");
        peer.address6 = Some("fd00::3".to_string());

        let set = build_peer_configs(&local, &[view(&peer)], &[], TranslateOptions::default()).unwrap();
        assert_eq!(set.peers[0].allowed_ips.len(), 1);

        let opts = TranslateOptions { dual_stack: true, is_ingress_gateway: false };
        let set = build_peer_configs(&local, &[view(&peer)], &[], opts).unwrap();
        assert_eq!(set.peers[0].allowed_ips, vec![net("10.10.10.3/32"), net("fd00::3/128")]);
    }

    #[test]
    fn test_ext_peers_only_for_ingress_gateways() {
        let local = node("198.51.100.1", "192.168.1.10", "10.10.10.2");
        let ext = ExtPeerView {
            client_id: "phone".to_string(),
            public_key: key(),
            address: "10.10.10.50".to_string(),
            address6: Some("fd00::50".to_string()),
            endpoint: "198.51.100.77".to_string(),
            keepalive: 25,
            ..Default::default()
        };

        let set = build_peer_configs(&local, &[], &[ext.clone()], TranslateOptions::default()).unwrap();
        assert!(set.peers.is_empty());

        let opts = TranslateOptions { dual_stack: true, is_ingress_gateway: true };
        let set = build_peer_configs(&local, &[], &[ext], opts).unwrap();
        assert_eq!(set.peers.len(), 1);
        let peer = &set.peers[0];
        assert_eq!(peer.allowed_ips, vec![net("10.10.10.50/32"), net("fd00::50/128")]);
        assert_eq!(peer.endpoint, None);
        assert_eq!(peer.persistent_keepalive, None);
    }

    #[test]
    fn test_endpoint_host_parsing() {
        assert_eq!(endpoint_host("1.2.3.4"), Some("1.2.3.4".parse().unwrap()));
        assert_eq!(endpoint_host("1.2.3.4:51821"), Some("1.2.3.4".parse().unwrap()));
        assert_eq!(endpoint_host("[fd00::1]:51821"), Some("fd00::1".parse().unwrap()));
        assert_eq!(endpoint_host("vpn.example.com"), None);
        assert!(same_endpoint_host("1.2.3.4:51821", "1.2.3.4:51822"));
    }
}
