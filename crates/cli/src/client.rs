//! HTTP client for the control plane

use crate::config::ServerConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use wgmesh_common::{Error, ExtPeerView, Node, NodeService, Object, ObjectKind, PeerView, Result};

/// `NodeService` over the daemon's HTTP API
#[derive(Debug, Clone)]
pub struct HttpNodeService {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

fn transport(err: reqwest::Error) -> Error {
    Error::Transport(err.to_string())
}

/// Fallback when the body carries no error code
fn error_for_status(status: StatusCode, message: String) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound {
            kind: "record".to_string(),
            id: message,
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::Malformed(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(message),
        StatusCode::CONFLICT => Error::PolicyViolation(message),
        s if s.is_server_error() && s != StatusCode::INTERNAL_SERVER_ERROR => {
            Error::Transport(message)
        }
        _ => Error::Internal(message),
    }
}

impl HttpNodeService {
    pub fn new(server: &ServerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(server.timeout_secs.max(1)))
            .build()
            .map_err(transport)?;
        Ok(Self {
            http,
            base: server.api_addr.trim_end_matches('/').to_string(),
            token: server.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.map_err(transport)?;
        Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(ErrorBody { error, code: Some(code) }) => Error::from_code(&code, error),
            Ok(ErrorBody { error, code: None }) => error_for_status(status, error),
            Err(_) => error_for_status(status, format!("{status}: {text}")),
        })
    }

    async fn call(&self, method: &str, request: &Object) -> Result<reqwest::Response> {
        let url = format!("{}/api/v1/rpc/{}", self.base, method);
        debug!("POST {}", url);
        let response = self
            .request(self.http.post(&url))
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await
    }

    async fn call_object(&self, method: &str, request: &Object) -> Result<Object> {
        self.call(method, request)
            .await?
            .json::<Object>()
            .await
            .map_err(transport)
    }
}

#[async_trait]
impl NodeService for HttpNodeService {
    async fn create_node(&self, node: &Node) -> Result<Node> {
        self.call_object("create_node", &Object::node(node)?)
            .await?
            .decode(ObjectKind::Node)
    }

    async fn read_node(&self, node: &Node) -> Result<Node> {
        self.call_object("read_node", &Object::node(node)?)
            .await?
            .decode(ObjectKind::Node)
    }

    async fn get_peers(&self, identity: &str, network: &str) -> Result<Vec<PeerView>> {
        self.call_object("get_peers", &Object::key(identity, network)?)
            .await?
            .decode(ObjectKind::Peers)
    }

    async fn get_ext_peers(&self, identity: &str, network: &str) -> Result<Vec<ExtPeerView>> {
        self.call_object("get_ext_peers", &Object::key(identity, network)?)
            .await?
            .decode(ObjectKind::ExtPeers)
    }

    async fn delete_node(&self, node: &Node) -> Result<()> {
        self.call("delete_node", &Object::node(node)?).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let url = format!("{}/health", self.base);
        let response = self
            .request(self.http.get(&url))
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await?;
        Ok(())
    }
}
