//! Typed forwarding to node agents
//!
//! Every node-facing endpoint of the controller goes through
//! [`NodeProxy::forward`], which builds the request against the node's
//! configured host and presents the node token.

use crate::config::NodeConfig;
use crate::error::{FleetError, Result};
use axum::body::Bytes;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

/// Response relayed back from a node agent
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    /// Upstream status
    pub status: StatusCode,
    /// Upstream content type, if any
    pub content_type: Option<HeaderValue>,
    /// Upstream body
    pub body: Bytes,
}

impl ProxiedResponse {
    /// Fail unless the node answered 2xx
    pub fn ensure_success(self, node: &str) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(FleetError::UpstreamUnavailable(format!(
                "node '{}' answered {}",
                node, self.status
            )))
        }
    }

    /// Body decoded as UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        if let Some(content_type) = self.content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Client for one node agent
#[derive(Debug, Clone)]
pub struct NodeProxy {
    http: reqwest::Client,
    name: String,
    node: NodeConfig,
}

impl NodeProxy {
    /// Proxy for node `name`
    pub fn new(http: reqwest::Client, name: &str, node: NodeConfig) -> Self {
        Self {
            http,
            name: name.to_string(),
            node,
        }
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send `method path` to the node with its token and relay the answer
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<ProxiedResponse> {
        let url = format!("http://{}{}", self.node.host, path);
        debug!("Proxying {} {} to node '{}'", method, url, self.name);

        let mut request = self
            .http
            .request(method, &url)
            .header(header::AUTHORIZATION, &self.node.token);
        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await.map_err(|e| {
            FleetError::UpstreamUnavailable(format!("node '{}': {}", self.name, e))
        })?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|e| {
            FleetError::UpstreamUnavailable(format!("node '{}': {}", self.name, e))
        })?;

        Ok(ProxiedResponse {
            status,
            content_type,
            body,
        })
    }

    /// Fetch the peer config for slot `id`, pointing it at the node's public endpoint
    pub async fn peer_config(&self, id: u8, sentinel: &str) -> Result<String> {
        let response = self
            .forward(Method::GET, &format!("/config?id={}", id), None)
            .await?
            .ensure_success(&self.name)?;

        Ok(rewrite_endpoint(
            &response.text(),
            sentinel,
            &self.node.true_endpoint,
        ))
    }
}

/// Replace the node-local sentinel endpoint with the public one
pub fn rewrite_endpoint(config: &str, sentinel: &str, true_endpoint: &str) -> String {
    config.replace(
        &format!("Endpoint = {}", sentinel),
        &format!("Endpoint = {}", true_endpoint),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn proxy_for(server: &MockServer) -> NodeProxy {
        let host = server.uri().trim_start_matches("http://").to_string();
        NodeProxy::new(
            reqwest::Client::new(),
            "fra",
            NodeConfig {
                host,
                true_endpoint: "109.122.216.14:51821".to_string(),
                token: "node-secret".to_string(),
            },
        )
    }

    #[test]
    fn test_rewrite_endpoint() {
        let config = "[Peer]\nEndpoint = 127.0.0.1:51820\nAllowedIPs = 0.0.0.0/0\n";
        let rewritten = rewrite_endpoint(config, "127.0.0.1:51820", "109.122.216.14:51821");
        assert_eq!(
            rewritten,
            "[Peer]\nEndpoint = 109.122.216.14:51821\nAllowedIPs = 0.0.0.0/0\n"
        );
    }

    #[test]
    fn test_rewrite_leaves_other_endpoints() {
        let config = "Endpoint = 10.0.0.9:51820\n";
        assert_eq!(rewrite_endpoint(config, "127.0.0.1:51820", "x:1"), config);
    }

    #[tokio::test]
    async fn test_forward_presents_node_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/relay"))
            .and(header_eq("Authorization", "node-secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"server": "se-got-wg-001"})),
            )
            .mount(&server)
            .await;

        let response = proxy_for(&server)
            .forward(Method::GET, "/relay", None)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), r#"{"server":"se-got-wg-001"}"#);
    }

    #[tokio::test]
    async fn test_peer_config_rewrites_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config"))
            .and(query_param("id", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "[Interface]\nAddress = 10.13.13.8\n[Peer]\nEndpoint = 127.0.0.1:51820\n",
            ))
            .mount(&server)
            .await;

        let config = proxy_for(&server)
            .peer_config(7, "127.0.0.1:51820")
            .await
            .unwrap();
        assert!(config.contains("Endpoint = 109.122.216.14:51821"));
        assert!(!config.contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_peer_config_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = proxy_for(&server)
            .peer_config(1, "127.0.0.1:51820")
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let proxy = NodeProxy::new(
            reqwest::Client::new(),
            "fra",
            NodeConfig {
                host: "127.0.0.1:1".to_string(),
                true_endpoint: "109.122.216.14:51821".to_string(),
                token: "node-secret".to_string(),
            },
        );
        let err = proxy.forward(Method::GET, "/pk", None).await.unwrap_err();
        assert!(matches!(err, FleetError::UpstreamUnavailable(_)));
    }
}
