//! Device slot allocation
//!
//! Slots are handed out lowest-free-first so slot numbers stay small and
//! predictable. Allocation plus insert happen under a fleet-wide write lock;
//! listing only takes the read side.

use crate::devices::{DeviceRecord, DeviceStore};
use crate::error::{FleetError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Lowest assignable slot
pub const MIN_SLOT: u8 = 1;

/// Highest assignable slot
pub const MAX_SLOT: u8 = 254;

/// First slot in `MIN_SLOT..=MAX_SLOT` not present in `taken`
pub fn lowest_free_slot(taken: &[u8]) -> Option<u8> {
    (MIN_SLOT..=MAX_SLOT).find(|id| !taken.contains(id))
}

/// Pick the lowest free slot on `node`.
///
/// Callers must hold the registry write lock until the record is inserted.
pub async fn allocate(node: &str, store: &dyn DeviceStore) -> Result<u8> {
    let taken = store.taken_ids(node).await?;
    let id = lowest_free_slot(&taken)
        .ok_or_else(|| FleetError::AllocationExhausted(node.to_string()))?;
    debug!("Allocated slot {} on node '{}' ({} taken)", id, node, taken.len());
    Ok(id)
}

/// Serialized access to the device store
pub struct DeviceRegistry {
    store: Arc<dyn DeviceStore>,
    /// Guards device mutation; reads share it
    lock: RwLock<()>,
}

impl DeviceRegistry {
    /// Wrap a store
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self {
            store,
            lock: RwLock::new(()),
        }
    }

    /// Whether `token` is a known user
    pub async fn is_known_token(&self, token: &str) -> Result<bool> {
        self.store.is_known_token(token).await
    }

    /// Devices on `node` owned by `owner`
    pub async fn list(&self, node: &str, owner: &str) -> Result<Vec<DeviceRecord>> {
        let _guard = self.lock.read().await;
        self.store.list(node, owner).await
    }

    /// Lease a new slot on `node` for `owner`.
    ///
    /// `provision` receives the chosen slot and returns the peer config for
    /// it; it runs while the write lock is held so no other lease can pick
    /// the same slot before the record lands in the store.
    pub async fn lease<F, Fut>(&self, node: &str, owner: &str, provision: F) -> Result<DeviceRecord>
    where
        F: FnOnce(u8) -> Fut + Send,
        Fut: Future<Output = Result<String>> + Send,
    {
        let _guard = self.lock.write().await;

        let id = allocate(node, self.store.as_ref()).await?;
        let config = provision(id).await?;
        let record = DeviceRecord::new(id, node, owner, config);
        self.store.insert(record.clone()).await?;

        info!("Leased slot {} on node '{}'", id, node);
        Ok(record)
    }

    /// Release slot `id` on `node` if `owner` holds it
    pub async fn release(&self, node: &str, id: u8, owner: &str) -> Result<bool> {
        let _guard = self.lock.write().await;
        let removed = self.store.delete(node, id, owner).await?;
        if removed {
            info!("Released slot {} on node '{}'", id, node);
        } else {
            debug!("Slot {} on node '{}' not held by caller", id, node);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::MemoryStore;
    use std::collections::HashSet;

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry::new(Arc::new(MemoryStore::with_users(["alice"]))))
    }

    async fn config_for(id: u8) -> Result<String> {
        Ok(format!("[Interface]\nAddress = 10.13.13.{}\n", u16::from(id) + 1))
    }

    #[test]
    fn test_lowest_free_slot_fills_gap() {
        assert_eq!(lowest_free_slot(&[]), Some(1));
        assert_eq!(lowest_free_slot(&[1, 2, 4]), Some(3));
        assert_eq!(lowest_free_slot(&[4, 2, 1]), Some(3));
        assert_eq!(lowest_free_slot(&[2, 3]), Some(1));
    }

    #[test]
    fn test_lowest_free_slot_exhausted() {
        let all: Vec<u8> = (MIN_SLOT..=MAX_SLOT).collect();
        assert_eq!(lowest_free_slot(&all), None);

        let almost: Vec<u8> = (MIN_SLOT..MAX_SLOT).collect();
        assert_eq!(lowest_free_slot(&almost), Some(MAX_SLOT));
    }

    #[tokio::test]
    async fn test_allocate_reports_exhaustion() {
        let store = MemoryStore::new();
        for id in MIN_SLOT..=MAX_SLOT {
            store
                .insert(DeviceRecord::new(id, "fra", "alice", String::new()))
                .await
                .unwrap();
        }

        let err = allocate("fra", &store).await.unwrap_err();
        assert!(matches!(err, FleetError::AllocationExhausted(node) if node == "fra"));
        assert_eq!(allocate("ams", &store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_release_then_reuse_lowest() {
        let registry = registry();
        for _ in 0..4 {
            registry.lease("fra", "alice", config_for).await.unwrap();
        }

        assert!(registry.release("fra", 3, "alice").await.unwrap());
        let record = registry.lease("fra", "alice", config_for).await.unwrap();
        assert_eq!(record.id, 3);
        assert_eq!(record.assigned_ip, "10.13.13.4");
    }

    #[tokio::test]
    async fn test_failed_provision_leaves_slot_free() {
        let registry = registry();
        let err = registry
            .lease("fra", "alice", |_| async {
                Err(FleetError::UpstreamUnavailable("node down".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::UpstreamUnavailable(_)));

        let record = registry.lease("fra", "alice", config_for).await.unwrap();
        assert_eq!(record.id, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_leases_are_unique() {
        let registry = registry();

        let handles: Vec<_> = (0..255)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .lease("fra", "alice", |id| async move {
                            tokio::task::yield_now().await;
                            config_for(id).await
                        })
                        .await
                })
            })
            .collect();

        let mut ids = HashSet::new();
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(record) => {
                    assert!((MIN_SLOT..=MAX_SLOT).contains(&record.id));
                    assert!(ids.insert(record.id), "slot {} handed out twice", record.id);
                }
                Err(FleetError::AllocationExhausted(_)) => exhausted += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(ids.len(), 254);
        assert_eq!(exhausted, 1);
    }
}
