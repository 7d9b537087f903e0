//! Relay switching on the node agent
//!
//! The node forwards peer traffic out through exactly one relay interface at
//! a time. A switch tears down the old relay's rules, brings every relay
//! config down, brings the new one up and installs its rules. Switches are
//! serialized on one mutex; a queued switch sees the state the previous one
//! left behind.

use crate::error::{FleetError, Result};
use crate::exec::CommandRunner;
use crate::security::{validate_interface_name, validate_relay_name};
use crate::wireguard::{config_path, Firewall, WgTools};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Outcome of the last switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    /// No relay brought up yet
    Idle,
    /// Relay up and rules installed
    Active,
    /// A step after the relay change failed; rules and interfaces may be partial
    Inconsistent,
}

impl std::fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayPhase::Idle => write!(f, "idle"),
            RelayPhase::Active => write!(f, "active"),
            RelayPhase::Inconsistent => write!(f, "inconsistent"),
        }
    }
}

/// In-memory relay state, never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayState {
    /// Relay currently selected
    pub active: Option<String>,
    /// Phase reached by the last switch
    pub phase: RelayPhase,
}

/// Serialized relay transitions
pub struct RelaySwitcher {
    runner: Arc<dyn CommandRunner>,
    tools: WgTools,
    firewall: Firewall,
    relay_dir: PathBuf,
    upgrade_command: Option<Vec<String>>,
    state: Mutex<RelayState>,
}

impl RelaySwitcher {
    /// Switcher over the relay configs in `relay_dir`
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        tools: WgTools,
        firewall: Firewall,
        relay_dir: PathBuf,
        upgrade_command: Option<Vec<String>>,
    ) -> Self {
        Self {
            runner,
            tools,
            firewall,
            relay_dir,
            upgrade_command,
            state: Mutex::new(RelayState {
                active: None,
                phase: RelayPhase::Idle,
            }),
        }
    }

    /// Relay currently selected
    pub async fn active(&self) -> Option<String> {
        self.state.lock().await.active.clone()
    }

    /// Snapshot of the state
    pub async fn state(&self) -> RelayState {
        self.state.lock().await.clone()
    }

    /// Rebuild the default relay from scratch at start.
    ///
    /// Rules a previous agent process left for the relay are removed first
    /// so restarts do not stack duplicates. Missing rules are not an error.
    pub async fn initialize(&self, default_relay: &str) -> Result<()> {
        validate_relay_name(default_relay)?;
        validate_interface_name(default_relay)?;
        info!("Initializing relay {}", default_relay);

        let missing = self.firewall.teardown(default_relay).await;
        debug!("{} leftover rule(s) of {} were not present", missing, default_relay);

        self.switch(default_relay).await
    }

    /// Make `relay` the egress relay.
    ///
    /// Rejected up front if the relay has no config. Once the active relay
    /// has been updated, failures are reported as
    /// [`FleetError::FirewallStateInconsistent`] and nothing is rolled back.
    pub async fn switch(&self, relay: &str) -> Result<()> {
        validate_relay_name(relay)?;
        validate_interface_name(relay)?;
        let config = config_path(&self.relay_dir, relay);
        if tokio::fs::metadata(&config).await.is_err() {
            return Err(FleetError::NotFound(format!("relay config {}", config.display())));
        }

        let mut state = self.state.lock().await;
        info!(
            "Switching relay {} -> {}",
            state.active.as_deref().unwrap_or("<none>"),
            relay
        );

        if let Some(previous) = state.active.clone() {
            let failed = self.firewall.teardown(&previous).await;
            if failed > 0 {
                warn!("{} rule(s) of {} could not be removed", failed, previous);
            }
        }

        if let Err(e) = self.tools.down_all(&self.relay_dir).await {
            // The previous relay's rules are already gone
            if state.active.is_some() {
                state.phase = RelayPhase::Inconsistent;
                error!("Relay {} left inconsistent: {}", relay, e);
            }
            return Err(e);
        }

        state.active = Some(relay.to_string());

        match self.bring_up(relay, &config).await {
            Ok(()) => {
                state.phase = RelayPhase::Active;
                info!("Relay {} active", relay);
                Ok(())
            }
            Err(e) => {
                state.phase = RelayPhase::Inconsistent;
                error!("Relay {} left inconsistent: {}", relay, e);
                Err(FleetError::FirewallStateInconsistent {
                    relay: relay.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn bring_up(&self, relay: &str, config: &std::path::Path) -> Result<()> {
        self.tools.up(config).await?;

        if let Some(command) = &self.upgrade_command {
            if let Some((program, rest)) = command.split_first() {
                let mut args = rest.to_vec();
                args.push(relay.to_string());
                self.runner.run(program, &args).await?;
            }
        }

        self.firewall.install(relay).await
    }
}
