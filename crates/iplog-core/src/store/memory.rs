// # Memory IP Store
//
// In-memory implementation of IpStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing and for dry runs where only the logs matter.
//
// ## Crash Behavior
//
// - All records are lost on restart/crash
// - The first cycle after a restart reports every address as inserted

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::apply_upsert;
use crate::Error;
use crate::config::StorageConfig;
use crate::extract::AddressClass;
use crate::traits::{AddressRecord, IpStore, IpStoreFactory, UpsertCounts};

#[derive(Debug, Default)]
struct Collections {
    private: HashMap<String, AddressRecord>,
    public: HashMap<String, AddressRecord>,
}

impl Collections {
    fn get(&self, class: AddressClass) -> &HashMap<String, AddressRecord> {
        match class {
            AddressClass::Private => &self.private,
            AddressClass::Public => &self.public,
        }
    }

    fn get_mut(&mut self, class: AddressClass) -> &mut HashMap<String, AddressRecord> {
        match class {
            AddressClass::Private => &mut self.private,
            AddressClass::Public => &mut self.public,
        }
    }
}

/// In-memory store implementation
///
/// Both collections live in HashMaps behind a single RwLock. A bulk upsert
/// holds the write lock for the whole batch.
///
/// # Example
///
/// ```rust,no_run
/// use iplog_core::store::MemoryIpStore;
/// use iplog_core::{AddressClass, IpStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryIpStore::new();
///
///     let counts = store
///         .upsert(AddressClass::Public, "8.8.8.8", chrono::Utc::now())
///         .await?;
///     assert_eq!(counts.inserted, 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryIpStore {
    inner: Arc<RwLock<Collections>>,
}

impl MemoryIpStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every record of a collection, sorted by ip
    pub async fn records(&self, class: AddressClass) -> Vec<AddressRecord> {
        let guard = self.inner.read().await;
        let mut records: Vec<AddressRecord> = guard.get(class).values().cloned().collect();
        records.sort_by(|a, b| a.ip.cmp(&b.ip));
        records
    }

    /// Clear both collections
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.private.clear();
        guard.public.clear();
    }
}

#[async_trait]
impl IpStore for MemoryIpStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn ensure_unique_index(&self, _class: AddressClass) -> Result<(), Error> {
        // HashMap keys are unique already
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        class: AddressClass,
        ips: &[String],
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertCounts, Error> {
        let mut guard = self.inner.write().await;
        Ok(apply_upsert(guard.get_mut(class), ips, seen_at))
    }

    async fn get_record(&self, class: AddressClass, ip: &str) -> Result<Option<AddressRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(class).get(ip).cloned())
    }

    async fn count(&self, class: AddressClass) -> Result<u64, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(class).len() as u64)
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store (everything is already "persisted")
        Ok(())
    }
}

/// Factory for [`MemoryIpStore`]
#[derive(Debug, Default)]
pub struct MemoryIpStoreFactory;

#[async_trait]
impl IpStoreFactory for MemoryIpStoreFactory {
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn IpStore>, Error> {
        match config {
            StorageConfig::Memory => Ok(Arc::new(MemoryIpStore::new())),
            other => Err(Error::config(format!(
                "Memory store cannot be built from '{}' configuration",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ips(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_memory_store_insert_then_update() {
        let store = MemoryIpStore::new();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);

        let first = store
            .bulk_upsert(AddressClass::Public, &ips(&["8.8.8.8", "1.1.1.1"]), t0)
            .await
            .unwrap();
        assert_eq!(first, UpsertCounts::new(2, 0));

        let second = store
            .bulk_upsert(AddressClass::Public, &ips(&["8.8.8.8", "9.9.9.9"]), t1)
            .await
            .unwrap();
        assert_eq!(second, UpsertCounts::new(1, 1));

        let record = store
            .get_record(AddressClass::Public, "8.8.8.8")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.last_seen, t1);

        assert_eq!(store.count(AddressClass::Public).await.unwrap(), 3);
        assert_eq!(store.count(AddressClass::Private).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_collections_are_separate() {
        let store = MemoryIpStore::new();
        let now = Utc::now();

        store.upsert(AddressClass::Private, "10.0.0.5", now).await.unwrap();

        assert!(store
            .get_record(AddressClass::Public, "10.0.0.5")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.records(AddressClass::Private).await.len(), 1);

        store.clear().await;
        assert_eq!(store.count(AddressClass::Private).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_factory_rejects_other_configs() {
        let factory = MemoryIpStoreFactory;
        assert!(factory.create(&StorageConfig::Memory).await.is_ok());
        assert!(factory.create(&StorageConfig::default()).await.is_err());
    }
}
