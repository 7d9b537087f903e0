//! Node agent
//!
//! Runs on every VPN node. Serves pre-generated peer configs and the server
//! public key to the controller, and switches the egress relay on request.

mod peers;

pub use peers::{read_text, strip_listen_port, PeerConfigs};

use crate::config::NodeAgentConfig;
use crate::error::{FleetError, Result};
use crate::exec::{CommandRunner, SystemRunner};
use crate::wireguard::{Firewall, RelaySwitcher, WgTools};
use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Relay selection, as read and written on `/relay`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    /// Relay name, also its config file stem
    pub server: String,
}

/// `?id=N` of `/config`
#[derive(Debug, Deserialize)]
pub struct ConfigQuery {
    /// Slot id
    pub id: u8,
}

/// Shared node agent state
pub struct NodeAgent {
    config: NodeAgentConfig,
    switcher: RelaySwitcher,
    peers: PeerConfigs,
}

impl NodeAgent {
    /// Agent over an explicit command runner
    pub fn new(config: NodeAgentConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let tools = WgTools::new(runner.clone(), "wg", config.wg_quick.clone());
        let firewall = Firewall::new(
            runner.clone(),
            config.iptables.clone(),
            config.uplink_interface.clone(),
            config.peer_subnet.clone(),
        );
        let switcher = RelaySwitcher::new(
            runner,
            tools,
            firewall,
            config.relay_dir.clone(),
            config.upgrade_command.clone(),
        );
        let peers = PeerConfigs::new(config.peer_dir.clone());
        Self {
            config,
            switcher,
            peers,
        }
    }

    /// Relay switcher
    pub fn switcher(&self) -> &RelaySwitcher {
        &self.switcher
    }

    /// Bring up the default relay and its rules
    pub async fn initialize(&self) -> Result<()> {
        self.switcher.initialize(&self.config.default_relay).await
    }
}

/// Node agent HTTP routes
pub fn router(agent: Arc<NodeAgent>) -> Router {
    Router::new()
        .route("/relay", get(get_relay).post(set_relay))
        .route("/config", get(peer_config))
        .route("/pk", get(public_key))
        .route_layer(middleware::from_fn_with_state(agent.clone(), require_node_token))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(agent)
}

/// Bring up the default relay, then serve until `shutdown` resolves
pub async fn serve<F>(config: NodeAgentConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;
    let listen = config.listen.clone();
    let agent = Arc::new(NodeAgent::new(config, Arc::new(SystemRunner::new())));
    agent.initialize().await?;

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("Node agent listening on {}", listen);

    axum::serve(listener, router(agent))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Node agent stopped");
    Ok(())
}

async fn require_node_token(
    State(agent): State<Arc<NodeAgent>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, FleetError> {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if presented != Some(agent.config.token.as_str()) {
        return Err(FleetError::Unauthorized);
    }
    Ok(next.run(request).await)
}

async fn get_relay(State(agent): State<Arc<NodeAgent>>) -> Json<Relay> {
    Json(Relay {
        server: agent.switcher.active().await.unwrap_or_default(),
    })
}

async fn set_relay(State(agent): State<Arc<NodeAgent>>, body: Bytes) -> Result<Json<Relay>> {
    let relay: Relay = serde_json::from_slice(&body)?;
    agent.switcher.switch(&relay.server).await?;
    Ok(Json(relay))
}

async fn peer_config(
    State(agent): State<Arc<NodeAgent>>,
    Query(query): Query<ConfigQuery>,
) -> Result<Response> {
    let config = agent.peers.read(query.id).await?;
    Ok(([(CONTENT_TYPE, "text/plain")], config).into_response())
}

async fn public_key(State(agent): State<Arc<NodeAgent>>) -> Result<Response> {
    let key = read_text(&agent.config.public_key_path).await?;
    Ok(([(CONTENT_TYPE, "text/plain")], key).into_response())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
