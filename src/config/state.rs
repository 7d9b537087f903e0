//! Persisted operator state of the host daemon
//!
//! One JSON blob holding where the controller lives, the operator token,
//! the cached node list and the slot leased on each node. Loaded at start
//! (absent file means the default value) and rewritten on every mutation.

use crate::error::{FleetError, Result};
use crate::security;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Daemon-resident operator state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Pinned controller IP; also the address kept out of the tunnel
    #[serde(default)]
    pub ip: String,

    /// Controller hostname
    #[serde(default)]
    pub vpn_host: String,

    /// Fronting hostname used by the fallback tunnel
    #[serde(default)]
    pub front_host: String,

    /// Operator token forwarded to the controller
    #[serde(default)]
    pub token: String,

    /// Node names last seen from the controller, sorted
    #[serde(default, rename = "nodes", deserialize_with = "null_as_default")]
    pub node_cache: Vec<String>,

    /// Leased slot per node
    #[serde(default, deserialize_with = "null_as_default")]
    pub slots: BTreeMap<String, u8>,

    /// Node whose interface was last brought up
    #[serde(default)]
    pub last_node: String,
}

/// Older writers emit `null` for empty collections
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl NodeState {
    /// Slot leased on `node`, if any
    pub fn slot(&self, node: &str) -> Option<u8> {
        self.slots.get(node).copied()
    }
}

/// On-disk location of a [`NodeState`]
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// State stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state; an absent file yields the default state
    pub async fn load(&self) -> Result<NodeState> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state at {:?}, starting empty", self.path);
                return Ok(NodeState::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            FleetError::Serialization(format!("Failed to parse state {:?}: {}", self.path, e))
        })
    }

    /// Persist state, owner-readable only
    pub async fn save(&self, state: &NodeState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        security::write_secret(&self.path, &bytes).await?;
        debug!("State persisted to {:?}", self.path);
        Ok(())
    }
}
