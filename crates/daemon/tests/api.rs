//! End-to-end tests of the HTTP API against an in-memory store

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;
use wgmesh_common::crypto::generate_keypair;
use wgmesh_common::{Database, Node, NodeAction, Object, ObjectKind, PeerView};
use wgmesh_daemon::{bootstrap, router, DaemonConfig, StateManager};

const TOKEN: &str = "test-token";

fn app() -> Router {
    let config = DaemonConfig {
        access_token: Some(TOKEN.to_string()),
        ..Default::default()
    };
    let db = Database::open_memory().unwrap();
    let state = StateManager::with_store(config, Arc::new(db));
    bootstrap(&state).unwrap();
    router(state)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

async fn rpc(app: &Router, method: &str, obj: &Object) -> (StatusCode, serde_json::Value) {
    call(
        app,
        "POST",
        &format!("/api/v1/rpc/{method}"),
        Some(serde_json::to_value(obj).unwrap()),
    )
    .await
}

fn member(mac: &str) -> Node {
    Node {
        mac_address: mac.to_string(),
        network: "mesh".to_string(),
        public_key: generate_keypair().public_key.to_base64(),
        endpoint: "198.51.100.7".to_string(),
        password: format!("secret-{mac}"),
        ..Default::default()
    }
}

async fn join(app: &Router, mac: &str) -> Node {
    let (status, body) = rpc(app, "create_node", &Object::node(&member(mac)).unwrap()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let obj: Object = serde_json::from_value(body).unwrap();
    obj.decode(ObjectKind::Node).unwrap()
}

async fn peers(app: &Router, mac: &str) -> Vec<PeerView> {
    let (status, body) = rpc(app, "get_peers", &Object::key(mac, "mesh").unwrap()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let obj: Object = serde_json::from_value(body).unwrap();
    obj.decode(ObjectKind::Peers).unwrap()
}

async fn create_mesh(app: &Router) {
    let (status, body) = call(
        app,
        "POST",
        "/api/v1/networks",
        Some(serde_json::json!({"net_id": "mesh", "address_range": "10.10.10.0/24"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn test_health_is_open_and_api_is_not() {
    let app = app();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/networks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, "GET", "/api/v1/networks", None).await;
    assert_eq!(status, StatusCode::OK);
    // The comms network is created at bootstrap
    assert_eq!(body[0]["net_id"], "comms");
}

#[tokio::test]
async fn test_join_and_resolve_peers() {
    let app = app();
    create_mesh(&app).await;

    let a = join(&app, "a").await;
    let b = join(&app, "b").await;
    assert!(a.password.is_empty());
    assert_ne!(a.address, b.address);

    // The server node is a member, so each node sees two peers
    let seen = peers(&app, "a").await;
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|p| p.mac_address != "a"));
    assert!(seen.iter().any(|p| p.is_server));

    let (status, body) = rpc(&app, "get_peers", &Object::key("ghost", "mesh").unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_relay_view_through_admin_update() {
    let app = app();
    create_mesh(&app).await;
    join(&app, "relay").await;
    let relayed = join(&app, "relayed").await;

    let (status, body) = call(
        &app,
        "PUT",
        "/api/v1/networks/mesh/nodes/relay",
        Some(serde_json::json!({"is_relay": true, "relay_addrs": [relayed.address]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let seen = peers(&app, "relayed").await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].mac_address, "relay");
    assert_eq!(seen[0].allowed_ips, vec!["10.10.10.0/24".to_string()]);
}

#[tokio::test]
async fn test_check_in_credentials() {
    let app = app();
    create_mesh(&app).await;
    let mut node = member("a");
    rpc(&app, "create_node", &Object::node(&node).unwrap()).await;

    let (status, _) = rpc(&app, "read_node", &Object::node(&node).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    node.password = "wrong".to_string();
    let (status, body) = rpc(&app, "read_node", &Object::node(&node).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_admin_delete_tombstones_then_exterminates() {
    let app = app();
    create_mesh(&app).await;
    let node = member("a");
    rpc(&app, "create_node", &Object::node(&node).unwrap()).await;

    let (status, _) = call(&app, "DELETE", "/api/v1/networks/mesh/nodes/a", None).await;
    assert_eq!(status, StatusCode::OK);

    // The node learns of its removal on check-in
    let (status, body) = rpc(&app, "read_node", &Object::node(&node).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let obj: Object = serde_json::from_value(body).unwrap();
    let record: Node = obj.decode(ObjectKind::Node).unwrap();
    assert_eq!(record.action, NodeAction::Delete);

    let (status, _) = call(
        &app,
        "DELETE",
        "/api/v1/networks/mesh/nodes/a?exterminate=true",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", "/api/v1/networks/mesh/nodes/a", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ext_clients_reach_ingress_gateway_only() {
    let app = app();
    create_mesh(&app).await;
    join(&app, "gw").await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/networks/mesh/extclients",
        Some(serde_json::json!({"client_id": "phone", "ingress_gateway_id": "gw", "public_key": "pk"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    call(
        &app,
        "PUT",
        "/api/v1/networks/mesh/nodes/gw",
        Some(serde_json::json!({"is_ingress_gateway": true})),
    )
    .await;
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/networks/mesh/extclients",
        Some(serde_json::json!({"client_id": "phone", "ingress_gateway_id": "gw", "public_key": "pk"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = rpc(&app, "get_ext_peers", &Object::key("gw", "mesh").unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let obj: Object = serde_json::from_value(body).unwrap();
    let ext: Vec<wgmesh_common::ExtPeerView> = obj.decode(ObjectKind::ExtPeers).unwrap();
    assert_eq!(ext.len(), 1);
    assert_eq!(ext[0].client_id, "phone");

    // Never part of the node-to-node enumeration
    join(&app, "other").await;
    assert!(peers(&app, "other").await.iter().all(|p| p.public_key != "pk"));
}

#[tokio::test]
async fn test_malformed_envelope_rejected() {
    let app = app();
    create_mesh(&app).await;
    let obj = Object::key("a", "mesh").unwrap();
    let (status, body) = rpc(&app, "create_node", &obj).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "malformed");
}
