//! Device leases
//!
//! A device is one WireGuard peer config leased to an owner token on a
//! node, identified by a small per-node slot number.

mod allocator;
mod sqlite;
mod store;

pub use allocator::{allocate, lowest_free_slot, DeviceRegistry, MAX_SLOT, MIN_SLOT};
pub use sqlite::SqliteStore;
pub use store::{DeviceStore, MemoryStore};

use serde::{Deserialize, Serialize};

/// A leased device slot. `(id, node)` is unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Slot id (1..=254)
    pub id: u8,
    /// Node the slot belongs to
    pub node: String,
    /// Token of the owning user
    pub owner_token: String,
    /// Peer config with the public endpoint filled in
    pub config: String,
    /// Address from the config's `Address = ` line, `N/A` if missing
    pub assigned_ip: String,
}

impl DeviceRecord {
    /// Build a record, extracting the assigned address from `config`
    pub fn new(id: u8, node: &str, owner_token: &str, config: String) -> Self {
        let assigned_ip = extract_address(&config);
        Self {
            id,
            node: node.to_string(),
            owner_token: owner_token.to_string(),
            config,
            assigned_ip,
        }
    }
}

/// Wire shape returned to device owners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceView {
    /// Slot id
    pub id: u8,
    /// Peer config
    pub config: String,
    /// Assigned address
    pub ip: String,
}

impl From<DeviceRecord> for DeviceView {
    fn from(record: DeviceRecord) -> Self {
        Self {
            id: record.id,
            config: record.config,
            ip: record.assigned_ip,
        }
    }
}

/// Value of the first `Address = ` line of a WireGuard config
fn extract_address(config: &str) -> String {
    config
        .lines()
        .find_map(|line| line.strip_prefix("Address = "))
        .map(|addr| addr.trim().to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_extracts_address() {
        let config = "[Interface]\nAddress = 10.13.13.4\nPrivateKey = abc\n";
        let record = DeviceRecord::new(4, "fra", "alice", config.to_string());
        assert_eq!(record.assigned_ip, "10.13.13.4");
    }

    #[test]
    fn test_record_without_address() {
        let record = DeviceRecord::new(1, "fra", "alice", "[Interface]\n".to_string());
        assert_eq!(record.assigned_ip, "N/A");
    }

    #[test]
    fn test_view_wire_shape() {
        let record = DeviceRecord::new(2, "fra", "alice", "Address = 10.13.13.3\n".to_string());
        let json = serde_json::to_value(DeviceView::from(record)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 2, "config": "Address = 10.13.13.3\n", "ip": "10.13.13.3"})
        );
    }
}
