// # File IP Store
//
// File-based implementation of IpStore with crash recovery.
//
// ## Purpose
//
// Provides durable storage for single-host deployments that do not run a
// database. Both collections live in one JSON document.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "collections": {
//     "private_ips": {
//       "10.0.0.5": {
//         "ip": "10.0.0.5",
//         "first_seen": "2025-01-09T12:00:00Z",
//         "last_seen": "2025-01-09T12:00:10Z"
//       }
//     },
//     "public_ips": {}
//   }
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::apply_upsert;
use crate::Error;
use crate::config::{CollectionNames, StorageConfig};
use crate::extract::AddressClass;
use crate::traits::{AddressRecord, IpStore, IpStoreFactory, UpsertCounts};

/// Store file format version
const STORE_FILE_VERSION: &str = "1.0";

type Records = HashMap<String, AddressRecord>;

/// File-based store with crash recovery
///
/// Every bulk upsert rewrites the file before returning, so a successful
/// call is durable.
///
/// # Example
///
/// ```rust,no_run
/// use iplog_core::config::CollectionNames;
/// use iplog_core::store::FileIpStore;
/// use iplog_core::{AddressClass, IpStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileIpStore::new("/var/lib/iplog/ips.json", CollectionNames::default()).await?;
///
///     store.upsert(AddressClass::Public, "8.8.8.8", chrono::Utc::now()).await?;
///     assert_eq!(store.count(AddressClass::Public).await?, 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileIpStore {
    path: PathBuf,
    names: CollectionNames,
    state: Arc<RwLock<FileState>>,
}

/// Internal state for file-based store
#[derive(Debug)]
struct FileState {
    collections: HashMap<String, Records>,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    collections: HashMap<String, Records>,
}

impl FileIpStore {
    /// Create or load a file store
    ///
    /// This will:
    /// 1. Try to load existing store file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with empty collections
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P, names: CollectionNames) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut collections = Self::load_with_recovery(&path).await?;
        for class in AddressClass::ALL {
            collections.entry(names.name(class).to_string()).or_default();
        }

        Ok(Self {
            path,
            names,
            state: Arc::new(RwLock::new(FileState { collections })),
        })
    }

    /// Load collections from file with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main store file
    /// 2. If JSON parse error, try loading backup
    /// 3. If backup also fails, start with empty collections
    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, Records>, Error> {
        match Self::load(path).await {
            Ok(collections) => {
                tracing::debug!("Loaded store file: {} collections", collections.len());
                Ok(collections)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Store file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty collections.");
                    return Ok(HashMap::new());
                }

                match Self::load(&backup_path).await {
                    Ok(collections) => {
                        tracing::info!("Recovered store from backup");
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(collections)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty collections.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load collections from file
    async fn load(path: &Path) -> Result<HashMap<String, Records>, Error> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::storage_unavailable(format!(
                "Failed to read store file {}: {}",
                path.display(),
                e
            ))
        })?;

        let store_file: StoreFileFormat = serde_json::from_str(&content)?;

        if store_file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STORE_FILE_VERSION,
                store_file.version
            );
        }

        Ok(store_file.collections)
    }

    /// Write `collections` to file atomically
    ///
    /// Callers hold the state write lock so writes never interleave.
    async fn write_collections(&self, collections: &HashMap<String, Records>) -> Result<(), Error> {
        let store_file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            collections: collections.clone(),
        };

        let json = serde_json::to_string_pretty(&store_file)
            .map_err(|e| Error::storage(format!("Failed to serialize store: {}", e)))?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::storage_unavailable(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::storage_unavailable(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::storage_unavailable(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::storage_unavailable(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl IpStore for FileIpStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn ping(&self) -> Result<(), Error> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                Err(Error::storage_unavailable(format!(
                    "Store directory missing: {}",
                    parent.display()
                )))
            }
            _ => Ok(()),
        }
    }

    async fn ensure_unique_index(&self, _class: AddressClass) -> Result<(), Error> {
        // Records are keyed by ip in the file format
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        class: AddressClass,
        ips: &[String],
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertCounts, Error> {
        let mut state_guard = self.state.write().await;

        // Memory only moves once the file holds the new batch
        let mut collections = state_guard.collections.clone();
        let records = collections
            .entry(self.names.name(class).to_string())
            .or_default();
        let counts = apply_upsert(records, ips, seen_at);

        self.write_collections(&collections).await?;
        state_guard.collections = collections;
        Ok(counts)
    }

    async fn get_record(&self, class: AddressClass, ip: &str) -> Result<Option<AddressRecord>, Error> {
        let state_guard = self.state.read().await;
        Ok(state_guard
            .collections
            .get(self.names.name(class))
            .and_then(|records| records.get(ip))
            .cloned())
    }

    async fn count(&self, class: AddressClass) -> Result<u64, Error> {
        let state_guard = self.state.read().await;
        Ok(state_guard
            .collections
            .get(self.names.name(class))
            .map_or(0, |records| records.len() as u64))
    }

    async fn flush(&self) -> Result<(), Error> {
        // bulk_upsert writes through before returning
        Ok(())
    }
}

/// Factory for [`FileIpStore`]
#[derive(Debug, Default)]
pub struct FileIpStoreFactory;

#[async_trait]
impl IpStoreFactory for FileIpStoreFactory {
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn IpStore>, Error> {
        match config {
            StorageConfig::File { path, collections } => {
                let store = FileIpStore::new(path, collections.clone()).await?;
                Ok(Arc::new(store))
            }
            other => Err(Error::config(format!(
                "File store cannot be built from '{}' configuration",
                other.type_name()
            ))),
        }
    }
}
