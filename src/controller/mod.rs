//! Controller device API
//!
//! Leases per-node device slots to users and forwards relay and key
//! queries to the node agents. Every route except `/check` and `/healthz`
//! requires a token from the user table.

mod auth;
mod handlers;
mod proxy;
mod relays;

pub use auth::{require_token, CallerToken};
pub use handlers::{CheckResponse, DeviceById, LoginRequest};
pub use proxy::{rewrite_endpoint, NodeProxy, ProxiedResponse};
pub use relays::RelayDirectory;

use crate::config::ControllerConfig;
use crate::devices::{DeviceRegistry, DeviceStore, MemoryStore, SqliteStore};
use crate::error::{FleetError, Result};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state handed to every controller handler
pub struct ControllerState {
    /// Static configuration
    pub config: ControllerConfig,
    /// Device leases
    pub devices: DeviceRegistry,
    /// Cached relay directory
    pub relays: RelayDirectory,
    http: reqwest::Client,
}

impl ControllerState {
    /// Build state over an existing device store
    pub fn new(config: ControllerConfig, store: Arc<dyn DeviceStore>) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let relays = RelayDirectory::new(http.clone(), config.relay_directory_url.clone());
        Ok(Self {
            config,
            devices: DeviceRegistry::new(store),
            relays,
            http,
        })
    }

    /// Build state over the SQLite store at `database_path`, seeding the
    /// configured tokens into its user table
    pub async fn open(config: ControllerConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.database_path).await?;
        for token in &config.tokens {
            store.add_user(token).await?;
        }
        Self::new(config, Arc::new(store))
    }

    /// Build state over an in-memory store seeded with the configured tokens
    pub fn from_config(config: ControllerConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::with_users(config.tokens.iter().cloned()));
        Self::new(config, store)
    }

    /// Proxy for a configured node
    pub fn proxy(&self, node: &str) -> Result<NodeProxy> {
        let node_config = self
            .config
            .node(node)
            .ok_or_else(|| FleetError::NotFound(format!("node '{}'", node)))?;
        Ok(NodeProxy::new(self.http.clone(), node, node_config.clone()))
    }
}

/// Controller HTTP routes
pub fn router(state: Arc<ControllerState>) -> Router {
    Router::new()
        .route("/nodes", get(handlers::nodes))
        .route("/relays", get(handlers::relays))
        .route("/chisel.json", get(handlers::tunnel_credentials))
        .route("/{node}/pk", get(handlers::node_public_key))
        .route(
            "/{node}/device",
            get(handlers::list_devices)
                .post(handlers::create_device)
                .delete(handlers::delete_device),
        )
        .route(
            "/{node}/relay",
            get(handlers::get_relay).post(handlers::set_relay),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        // Added after the auth layer so they stay public
        .route("/check", post(handlers::check))
        .route("/healthz", get(handlers::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Run the controller until `shutdown` resolves
pub async fn serve<F>(config: ControllerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listen = config.listen.clone();
    info!("Controller serving {} node(s)", config.nodes.len());
    let state = Arc::new(ControllerState::open(config).await?);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("Controller listening on {}", listen);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Controller stopped");
    Ok(())
}
