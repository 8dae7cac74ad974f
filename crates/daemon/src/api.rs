//! HTTP API
//!
//! Two groups of routes under `/api/v1`:
//!
//! - `rpc/*`: the node-facing `NodeService` calls, each taking and returning
//!   an `Object` envelope;
//! - `networks/*`: administration of networks, nodes, ext clients and the
//!   hole-punch registry.
//!
//! `/health` stays outside the access-token check and doubles as the
//! reachability probe clients use.

use crate::auth::{require_token, AccessToken};
use crate::service::LocalNodeService;
use crate::state::StateManager;
use crate::{extclient, holepunch, lifecycle, network};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;
use wgmesh_common::store::record_key;
use wgmesh_common::{Error, ExtClient, Network, NetworkUpdate, Node, NodeService, Object, ObjectKind};

/// Shared handler state
pub struct ApiState {
    service: LocalNodeService,
}

impl ApiState {
    fn state(&self) -> &StateManager {
        self.service.state()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error rendered as `{"error": ..., "code": ...}`
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// Status code for an error
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Malformed(_) | Error::Serialization(_) | Error::InvalidConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::PolicyViolation(_) | Error::AlreadyInstalled(_) => StatusCode::CONFLICT,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::Transport(_) => StatusCode::BAD_GATEWAY,
        Error::Io(_) | Error::Database(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(serde_json::json!({"error": self.0.to_string(), "code": self.0.code()})),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn redacted(mut node: Node) -> Node {
    node.password.clear();
    node
}

// ============================================================================
// Router
// ============================================================================

/// Build the API router over the given state
pub fn router(state: StateManager) -> Router {
    let token = AccessToken(
        state
            .config()
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .map(Arc::from),
    );
    let api = Arc::new(ApiState {
        service: LocalNodeService::new(state),
    });

    let protected = Router::new()
        // Node-facing calls
        .route("/api/v1/rpc/create_node", post(rpc_create_node))
        .route("/api/v1/rpc/read_node", post(rpc_read_node))
        .route("/api/v1/rpc/get_peers", post(rpc_get_peers))
        .route("/api/v1/rpc/get_ext_peers", post(rpc_get_ext_peers))
        .route("/api/v1/rpc/delete_node", post(rpc_delete_node))
        // Administration
        .route("/api/v1/networks", get(list_networks).post(create_network))
        .route(
            "/api/v1/networks/:net_id",
            get(get_network).put(update_network).delete(delete_network),
        )
        .route("/api/v1/networks/:net_id/nodes", get(list_nodes))
        .route(
            "/api/v1/networks/:net_id/nodes/:identity",
            get(get_node).put(update_node).delete(delete_node),
        )
        .route(
            "/api/v1/networks/:net_id/extclients",
            get(list_ext_clients).post(create_ext_client),
        )
        .route(
            "/api/v1/networks/:net_id/extclients/:client_id",
            axum::routing::delete(delete_ext_client),
        )
        .route("/api/v1/networks/:net_id/holepunch", post(record_hole_punch))
        .route_layer(middleware::from_fn_with_state(token, require_token))
        .with_state(api);

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "version": wgmesh_common::VERSION}))
}

// ============================================================================
// Node-facing calls
// ============================================================================

async fn rpc_create_node(
    State(api): State<Arc<ApiState>>,
    Json(req): Json<Object>,
) -> ApiResult<Json<Object>> {
    let node: Node = req.decode(ObjectKind::Node)?;
    let created = api.service.create_node(&node).await?;
    Ok(Json(Object::node(&created)?))
}

async fn rpc_read_node(
    State(api): State<Arc<ApiState>>,
    Json(req): Json<Object>,
) -> ApiResult<Json<Object>> {
    let node: Node = req.decode(ObjectKind::Node)?;
    let record = api.service.read_node(&node).await?;
    Ok(Json(Object::node(&record)?))
}

async fn rpc_get_peers(
    State(api): State<Arc<ApiState>>,
    Json(req): Json<Object>,
) -> ApiResult<Json<Object>> {
    let (identity, network) = req.split_key()?;
    let peers = api.service.get_peers(identity, network).await?;
    Ok(Json(Object::peers(&peers)?))
}

async fn rpc_get_ext_peers(
    State(api): State<Arc<ApiState>>,
    Json(req): Json<Object>,
) -> ApiResult<Json<Object>> {
    let (identity, network) = req.split_key()?;
    let peers = api.service.get_ext_peers(identity, network).await?;
    Ok(Json(Object::ext_peers(&peers)?))
}

async fn rpc_delete_node(
    State(api): State<Arc<ApiState>>,
    Json(req): Json<Object>,
) -> ApiResult<impl IntoResponse> {
    let node: Node = req.decode(ObjectKind::Node)?;
    api.service.delete_node(&node).await?;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}

// ============================================================================
// Networks
// ============================================================================

async fn list_networks(State(api): State<Arc<ApiState>>) -> ApiResult<Json<Vec<Network>>> {
    Ok(Json(api.state().list_networks()?))
}

async fn create_network(
    State(api): State<Arc<ApiState>>,
    Json(req): Json<Network>,
) -> ApiResult<impl IntoResponse> {
    let created = network::create_network(api.state(), req)?;
    lifecycle::ensure_server_node(api.state(), &created)?;
    let created = api.state().get_network(&created.net_id)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_network(
    State(api): State<Arc<ApiState>>,
    Path(net_id): Path<String>,
) -> ApiResult<Json<Network>> {
    Ok(Json(api.state().get_network(&net_id)?))
}

async fn update_network(
    State(api): State<Arc<ApiState>>,
    Path(net_id): Path<String>,
    Json(req): Json<NetworkUpdate>,
) -> ApiResult<Json<Network>> {
    Ok(Json(network::update_network(api.state(), &net_id, &req)?))
}

async fn delete_network(
    State(api): State<Arc<ApiState>>,
    Path(net_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    network::delete_network(api.state(), &net_id)?;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeleteNodeParams {
    exterminate: bool,
}

async fn list_nodes(
    State(api): State<Arc<ApiState>>,
    Path(net_id): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    api.state().get_network(&net_id)?;
    let nodes = api
        .state()
        .list_network_nodes(&net_id)?
        .into_iter()
        .map(redacted)
        .collect();
    Ok(Json(nodes))
}

async fn get_node(
    State(api): State<Arc<ApiState>>,
    Path((net_id, identity)): Path<(String, String)>,
) -> ApiResult<Json<Node>> {
    let node = lifecycle::get_node(api.state(), &record_key(&identity, &net_id)?)?;
    Ok(Json(redacted(node)))
}

async fn update_node(
    State(api): State<Arc<ApiState>>,
    Path((net_id, identity)): Path<(String, String)>,
    Json(req): Json<lifecycle::NodeUpdate>,
) -> ApiResult<Json<Node>> {
    let node = lifecycle::update_node(api.state(), &record_key(&identity, &net_id)?, &req)?;
    Ok(Json(redacted(node)))
}

async fn delete_node(
    State(api): State<Arc<ApiState>>,
    Path((net_id, identity)): Path<(String, String)>,
    Query(params): Query<DeleteNodeParams>,
) -> ApiResult<impl IntoResponse> {
    lifecycle::delete_node(
        api.state(),
        &record_key(&identity, &net_id)?,
        params.exterminate,
    )?;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}

// ============================================================================
// Ext clients and hole punching
// ============================================================================

async fn list_ext_clients(
    State(api): State<Arc<ApiState>>,
    Path(net_id): Path<String>,
) -> ApiResult<Json<Vec<ExtClient>>> {
    Ok(Json(extclient::list_ext_clients(api.state(), &net_id)?))
}

async fn create_ext_client(
    State(api): State<Arc<ApiState>>,
    Path(net_id): Path<String>,
    Json(mut req): Json<ExtClient>,
) -> ApiResult<impl IntoResponse> {
    req.network = net_id;
    let created = extclient::create_ext_client(api.state(), req)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_ext_client(
    State(api): State<Arc<ApiState>>,
    Path((net_id, client_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    extclient::delete_ext_client(api.state(), &client_id, &net_id)?;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}

#[derive(Debug, Deserialize)]
struct HolePunchReport {
    public_key: String,
    endpoint: String,
}

async fn record_hole_punch(
    State(api): State<Arc<ApiState>>,
    Path(net_id): Path<String>,
    Json(req): Json<HolePunchReport>,
) -> ApiResult<impl IntoResponse> {
    api.state().get_network(&net_id)?;
    holepunch::record_endpoint(api.state(), &net_id, &req.public_key, &req.endpoint)?;
    Ok(Json(serde_json::json!({"status": "recorded"})))
}
