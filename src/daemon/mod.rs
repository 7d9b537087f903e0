//! Host daemon
//!
//! Holds the operator state, fetches and rewrites tunnel configs from the
//! controller, keeps the fallback tunnel alive and drives `wg-quick` for
//! the local client over a unix socket.

mod client;
mod handlers;
mod server;
mod sync;

pub use client::ControllerClient;
pub use handlers::router;
pub use server::ControlServer;
pub use sync::{rewrite_config, ConfigSync, SyncReport};

use crate::config::{DaemonConfig, DaemonPaths, NodeState, StateFile};
use crate::error::{FleetError, Result};
use crate::exec::{CommandRunner, SystemRunner};
use crate::fallback::{ChiselClient, TunnelSupervisor};
use crate::security::{self, ensure_dir, write_secret, SecureFileMode};
use crate::wireguard::{interface_name, WgTools};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Shared daemon state handed to every handler
pub struct DaemonContext {
    config: DaemonConfig,
    paths: DaemonPaths,
    state: RwLock<NodeState>,
    state_file: StateFile,
    tools: WgTools,
    supervisor: TunnelSupervisor,
    /// One sync at a time
    sync_lock: Mutex<()>,
    controller_base: Option<String>,
}

impl DaemonContext {
    /// Context with default state
    pub fn new(config: DaemonConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let paths = config.paths();
        let tools = WgTools::new(runner, config.wg.clone(), config.wg_quick.clone());
        Self {
            state_file: StateFile::new(paths.state.clone()),
            paths,
            config,
            state: RwLock::new(NodeState::default()),
            tools,
            supervisor: TunnelSupervisor::new(),
            sync_lock: Mutex::new(()),
            controller_base: None,
        }
    }

    /// Context with state loaded from disk
    pub async fn load(config: DaemonConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let context = Self::new(config, runner);
        let state = context.state_file.load().await?;
        *context.state.write().await = state;
        Ok(context)
    }

    /// Send controller requests to `base` instead of `https://<vpn_host>`
    pub fn with_controller_base(mut self, base: impl Into<String>) -> Self {
        self.controller_base = Some(base.into());
        self
    }

    /// Derived paths
    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    /// Fallback tunnel supervisor
    pub fn supervisor(&self) -> &TunnelSupervisor {
        &self.supervisor
    }

    /// Create the base and config directories
    pub fn prepare_dirs(&self) -> Result<()> {
        ensure_dir(&self.paths.base, SecureFileMode::BaseDirectory)?;
        ensure_dir(&self.paths.raw_dir, SecureFileMode::SecretDirectory)?;
        ensure_dir(&self.paths.active_dir, SecureFileMode::SecretDirectory)?;
        Ok(())
    }

    /// Snapshot of the operator state
    pub async fn state(&self) -> NodeState {
        self.state.read().await.clone()
    }

    /// Replace and persist the operator state
    pub async fn update_state(&self, new_state: NodeState) -> Result<NodeState> {
        let mut state = self.state.write().await;
        self.state_file.save(&new_state).await?;
        *state = new_state;
        info!("State updated ({} node(s), {} slot(s))", state.node_cache.len(), state.slots.len());
        Ok(state.clone())
    }

    /// Reset the operator state to its default and persist it
    pub async fn reset_state(&self) -> Result<NodeState> {
        info!("Resetting state");
        self.update_state(NodeState::default()).await
    }

    fn client(&self, state: &NodeState) -> Result<ControllerClient> {
        ControllerClient::from_state(state, self.controller_base.as_deref())
    }

    /// Node list from the controller, sorted, persisted when it changed.
    ///
    /// Falls back to the cached list when the controller cannot be reached.
    pub async fn refresh_nodes(&self) -> Result<Vec<String>> {
        let snapshot = self.state().await;
        let fetched = match self.client(&snapshot) {
            Ok(client) => client.nodes().await,
            Err(e) => Err(e),
        };

        let mut nodes = match fetched {
            Ok(nodes) => nodes,
            Err(e) if !snapshot.node_cache.is_empty() => {
                warn!("Serving cached node list: {}", e);
                return Ok(snapshot.node_cache);
            }
            Err(e) => return Err(e),
        };
        nodes.sort();

        let mut state = self.state.write().await;
        if state.node_cache != nodes {
            let mut updated = state.clone();
            updated.node_cache = nodes.clone();
            self.state_file.save(&updated).await?;
            *state = updated;
            info!("Node list changed: {:?}", nodes);
        }
        Ok(nodes)
    }

    /// Fetch `chisel.json`; keep the existing file if the fetch fails
    pub async fn refresh_tunnel_credentials(&self) -> Result<()> {
        let snapshot = self.state().await;
        let fetched = match self.client(&snapshot) {
            Ok(client) => client.tunnel_credentials().await,
            Err(e) => Err(e),
        };

        match fetched {
            Ok(bytes) => {
                write_secret(&self.paths.credentials, &bytes).await?;
                debug!("Tunnel credentials refreshed");
                Ok(())
            }
            Err(e) => {
                if !exists(&self.paths.credentials).await {
                    return Err(e);
                }
                warn!("Keeping existing tunnel credentials: {}", e);
                Ok(())
            }
        }
    }

    /// Start the fallback tunnel unless it is already running
    pub fn ensure_tunnel(&self) -> bool {
        let client = ChiselClient::new(self.config.tunnel_binary.clone(), self.paths.credentials.clone());
        self.supervisor.ensure_started(Arc::new(client))
    }

    /// Refresh credentials, make sure the tunnel runs, then sync every node
    pub async fn sync_configs(&self) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;

        self.refresh_tunnel_credentials().await?;
        self.ensure_tunnel();

        let state = self.state().await;
        let client = self.client(&state)?;
        let report = ConfigSync::new(&client, &self.paths, self.config.rendezvous_ip.as_deref())
            .run(&state)
            .await?;

        info!(
            "Sync finished: {} updated, {} stale",
            report.updated.len(),
            report.stale.len()
        );
        Ok(report)
    }

    /// Bring the last used interface back up after a restart.
    ///
    /// Returns true when an up was attempted.
    pub async fn resume(&self) -> Result<bool> {
        let last_node = self.state().await.last_node;
        if last_node.is_empty() {
            return Ok(false);
        }

        let status = match self.tools.status().await {
            Ok(status) => status,
            Err(e) => {
                warn!("Cannot read interface status: {}", e);
                String::new()
            }
        };
        let config = self.paths.active_config(&last_node);
        let interface = interface_name(&config).unwrap_or_default();
        let running = format!("interface: {}", interface);
        if status.lines().any(|line| line.trim() == running) {
            debug!("{} already up", interface);
            return Ok(false);
        }

        self.ensure_tunnel();
        info!("Starting last used wg config: {}", last_node);
        if let Err(e) = self.tools.up(&config).await {
            warn!("Failed to resume {}: {}", config.display(), e);
        }
        Ok(true)
    }

    /// `wg` status output
    pub async fn wg_status(&self) -> Result<String> {
        self.tools.status().await
    }

    /// `wg-quick up` on a config from the active directory; returns the tool's output
    pub async fn wg_quick_up(&self, config: &str) -> Result<String> {
        let config = self.active_config_path(config).await?;
        Ok(self.tools.up(&config).await?.stdout)
    }

    /// `wg-quick down` on a config from the active directory; returns the tool's output
    pub async fn wg_quick_down(&self, config: &str) -> Result<String> {
        let config = self.active_config_path(config).await?;
        Ok(self.tools.down(&config).await?.stdout)
    }

    /// Resolve a client-supplied path to a `.conf` file directly inside
    /// the active config directory.
    ///
    /// Symlinks are resolved before the check, so a link out of the
    /// directory is rejected like any other foreign path.
    async fn active_config_path(&self, config: &str) -> Result<PathBuf> {
        let config = config.trim();
        if config.is_empty() {
            return Err(FleetError::Validation("Empty config path".to_string()));
        }
        let requested = security::sanitize_path(config)?;
        let rejected = || FleetError::Validation(format!("Not an active config: {}", config));

        let resolved = tokio::fs::canonicalize(&requested)
            .await
            .map_err(|_| rejected())?;
        let active_dir = tokio::fs::canonicalize(&self.paths.active_dir).await?;

        let is_conf = resolved.extension().is_some_and(|ext| ext == "conf");
        let in_active_dir = resolved.parent() == Some(active_dir.as_path());
        let is_file = tokio::fs::metadata(&resolved)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !(is_conf && in_active_dir && is_file) {
            warn!("Rejected wg-quick config outside {}: {}", active_dir.display(), config);
            return Err(rejected());
        }
        Ok(resolved)
    }
}

/// Prepare directories, resume the last interface and serve the control
/// socket until `shutdown` resolves
pub async fn serve<F>(config: DaemonConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let context = DaemonContext::load(config, Arc::new(SystemRunner::new())).await?;
    context.prepare_dirs()?;

    if let Err(e) = context.resume().await {
        warn!("Resume failed: {}", e);
    }

    let context = Arc::new(context);
    let server = ControlServer::new(context.paths().socket.clone(), router(context.clone()));
    server.start(shutdown).await
}

/// Whether `path` exists, treating errors as absence
pub(crate) async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
