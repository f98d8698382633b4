//! Plugin-based storage registry
//!
//! The registry maps storage type names to factories so that the daemon
//! can build a backend from configuration without a hardcoded match over
//! every backend crate.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use iplog_core::registry::StoreRegistry;
//! use iplog_core::config::StorageConfig;
//!
//! let registry = StoreRegistry::with_builtin();
//! iplog_store_mongodb::register(&registry);
//!
//! let store = registry.create_store(&StorageConfig::default()).await?;
//! ```
//!
//! ## Registration
//!
//! Backend crates register themselves during initialization:
//!
//! ```rust,ignore
//! pub fn register(registry: &StoreRegistry) {
//!     registry.register_store("mongodb", Box::new(MongoIpStoreFactory));
//! }
//! ```

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::store::{FileIpStoreFactory, MemoryIpStoreFactory};
use crate::traits::{IpStore, IpStoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registry of storage backend factories
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct StoreRegistry {
    stores: RwLock<HashMap<String, Arc<dyn IpStoreFactory>>>,
}

impl StoreRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` backends registered
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryIpStoreFactory));
        registry.register_store("file", Box::new(FileIpStoreFactory));
        registry
    }

    /// Register a storage factory under `name`
    ///
    /// Registering the same name twice replaces the earlier factory.
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn IpStoreFactory>) {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        stores.insert(name.into(), Arc::from(factory));
    }

    /// Build a store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn IpStore>)`: Created store instance
    /// - `Err(Error::Config)`: If the storage type is not registered
    /// - Any error from the factory itself
    pub async fn create_store(&self, config: &StorageConfig) -> Result<Arc<dyn IpStore>> {
        let store_type = config.type_name();

        let factory = {
            let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
            stores
                .get(store_type)
                .cloned()
                .ok_or_else(|| Error::config(format!("Unknown storage type: {}", store_type)))?
        };

        factory.create(config).await
    }

    /// List all registered storage types
    pub fn list_stores(&self) -> Vec<String> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a storage type is registered
    pub fn has_store(&self, name: &str) -> bool {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionNames;
    use async_trait::async_trait;

    struct FailingFactory;

    #[async_trait]
    impl IpStoreFactory for FailingFactory {
        async fn create(&self, _config: &StorageConfig) -> Result<Arc<dyn IpStore>> {
            Err(Error::storage_unavailable("mock backend is down"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = StoreRegistry::new();
        assert!(!registry.has_store("mongodb"));

        registry.register_store("mongodb", Box::new(FailingFactory));

        assert!(registry.has_store("mongodb"));
        assert_eq!(registry.list_stores(), ["mongodb"]);
    }

    #[test]
    fn test_builtin_backends() {
        let registry = StoreRegistry::with_builtin();
        assert_eq!(registry.list_stores(), ["file", "memory"]);
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let registry = StoreRegistry::with_builtin();
        let store = registry.create_store(&StorageConfig::Memory).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_create_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::with_builtin();
        let config = StorageConfig::File {
            path: dir.path().join("ips.json").display().to_string(),
            collections: CollectionNames::default(),
        };

        let store = registry.create_store(&config).await.unwrap();
        assert_eq!(store.backend_name(), "file");
    }

    #[tokio::test]
    async fn test_unknown_type_is_config_error() {
        let registry = StoreRegistry::with_builtin();
        let result = registry.create_store(&StorageConfig::default()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_factory_errors_propagate() {
        let registry = StoreRegistry::new();
        registry.register_store("memory", Box::new(FailingFactory));
        let result = registry.create_store(&StorageConfig::Memory).await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }
}
