//! Device and user storage
//!
//! The controller only needs a handful of operations from its user/device
//! table, expressed as [`DeviceStore`]. [`SqliteStore`](super::SqliteStore)
//! keeps leases across restarts; [`MemoryStore`] is the in-process
//! implementation used in tests.

use crate::devices::DeviceRecord;
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

/// Operations the controller performs on its user/device table
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Register a user token; registering it twice is not an error
    async fn add_user(&self, token: &str) -> Result<()>;

    /// Whether `token` belongs to a known user
    async fn is_known_token(&self, token: &str) -> Result<bool>;

    /// Slot ids in use on `node`, in no particular order
    async fn taken_ids(&self, node: &str) -> Result<Vec<u8>>;

    /// Insert a new record; fails if `(id, node)` already exists
    async fn insert(&self, record: DeviceRecord) -> Result<()>;

    /// Records on `node` owned by `owner`, ordered by id
    async fn list(&self, node: &str, owner: &str) -> Result<Vec<DeviceRecord>>;

    /// Delete `(id, node)` if owned by `owner`; returns whether a row went away
    async fn delete(&self, node: &str, id: u8, owner: &str) -> Result<bool>;
}

/// In-memory [`DeviceStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashSet<String>>,
    devices: RwLock<BTreeMap<(String, u8), DeviceRecord>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with user tokens
    pub fn with_users<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: RwLock::new(tokens.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

fn poisoned<T>(_: T) -> FleetError {
    FleetError::Config("device store lock poisoned".to_string())
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn add_user(&self, token: &str) -> Result<()> {
        self.users.write().map_err(poisoned)?.insert(token.to_string());
        Ok(())
    }

    async fn is_known_token(&self, token: &str) -> Result<bool> {
        Ok(self.users.read().map_err(poisoned)?.contains(token))
    }

    async fn taken_ids(&self, node: &str) -> Result<Vec<u8>> {
        let devices = self.devices.read().map_err(poisoned)?;
        Ok(devices
            .keys()
            .filter(|(n, _)| n == node)
            .map(|(_, id)| *id)
            .collect())
    }

    async fn insert(&self, record: DeviceRecord) -> Result<()> {
        let mut devices = self.devices.write().map_err(poisoned)?;
        let key = (record.node.clone(), record.id);
        if devices.contains_key(&key) {
            return Err(FleetError::Validation(format!(
                "Device {} already exists on node '{}'",
                record.id, record.node
            )));
        }
        devices.insert(key, record);
        Ok(())
    }

    async fn list(&self, node: &str, owner: &str) -> Result<Vec<DeviceRecord>> {
        let devices = self.devices.read().map_err(poisoned)?;
        Ok(devices
            .values()
            .filter(|d| d.node == node && d.owner_token == owner)
            .cloned()
            .collect())
    }

    async fn delete(&self, node: &str, id: u8, owner: &str) -> Result<bool> {
        let mut devices = self.devices.write().map_err(poisoned)?;
        let key = (node.to_string(), id);
        match devices.get(&key) {
            Some(record) if record.owner_token == owner => {
                devices.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
