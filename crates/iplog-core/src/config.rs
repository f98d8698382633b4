//! Configuration types for the iplog worker
//!
//! This module defines all configuration structures used throughout the crate.
//! Loading them (environment, files) is left to the embedding application.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::extract::{AddressClass, FilterPolicy};

/// Default MongoDB connection string
pub const DEFAULT_MONGODB_URI: &str = "mongodb://mongodb:27017/";

/// Default database name
pub const DEFAULT_DATABASE: &str = "ip_extraction";

/// Default log file scanned by the worker
pub const DEFAULT_FILE_PATH: &str = "data/access.log";

/// Main iplog configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IplogConfig {
    /// Log file scanning
    #[serde(default)]
    pub scan: ScanConfig,

    /// Storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Address admission policy
    #[serde(default)]
    pub filter: FilterPolicy,

    /// Retry policy for storage operations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Scheduler settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl IplogConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.scan.validate()?;
        self.storage.validate()?;
        self.retry.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Log file scanning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Path of the log file to scan
    #[serde(default = "default_file_path")]
    pub file_path: String,

    /// Upper bound of a single chunk handed to a worker (bytes)
    ///
    /// Larger chunks mean fewer, bigger units of parallel work.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of parse workers (0 = one per CPU)
    #[serde(default)]
    pub workers: usize,

    /// Upper bound for reading and parsing the file (in seconds)
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl ScanConfig {
    /// Validate the scan configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.file_path.is_empty() {
            return Err(crate::Error::config("Scan file path cannot be empty"));
        }
        if self.chunk_size == 0 {
            return Err(crate::Error::config("Scan chunk size must be > 0"));
        }
        if self.read_timeout_secs == 0 {
            return Err(crate::Error::config("Scan read timeout must be > 0"));
        }
        Ok(())
    }

    /// Read timeout as a [`Duration`]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            file_path: default_file_path(),
            chunk_size: default_chunk_size(),
            workers: 0,
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

/// Names of the two durable collections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionNames {
    /// Collection holding RFC 1918 addresses
    #[serde(default = "default_private_collection")]
    pub private: String,

    /// Collection holding every other admitted address
    #[serde(default = "default_public_collection")]
    pub public: String,
}

impl CollectionNames {
    /// Resolve the name for a logical collection
    pub fn name(&self, class: AddressClass) -> &str {
        match class {
            AddressClass::Private => &self.private,
            AddressClass::Public => &self.public,
        }
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.private.is_empty() || self.public.is_empty() {
            return Err(crate::Error::config("Collection names cannot be empty"));
        }
        if self.private == self.public {
            return Err(crate::Error::config(
                "Private and public collections must be distinct",
            ));
        }
        Ok(())
    }
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            private: default_private_collection(),
            public: default_public_collection(),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// MongoDB backend
    Mongodb {
        /// Connection string
        #[serde(default = "default_mongodb_uri")]
        uri: String,
        /// Database name
        #[serde(default = "default_database")]
        database: String,
        /// Collection names
        #[serde(default)]
        collections: CollectionNames,
        /// Server selection / connect / socket timeout (in seconds)
        #[serde(default = "default_storage_timeout_secs")]
        timeout_secs: u64,
    },

    /// JSON file backend
    File {
        /// Path to the JSON file
        path: String,
        /// Collection names
        #[serde(default)]
        collections: CollectionNames,
    },

    /// In-memory backend (not persistent)
    Memory,
}

impl StorageConfig {
    /// Validate the storage configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StorageConfig::Mongodb {
                uri,
                database,
                collections,
                timeout_secs,
            } => {
                if uri.is_empty() {
                    return Err(crate::Error::config("MongoDB URI cannot be empty"));
                }
                if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
                    return Err(crate::Error::config(
                        "MongoDB URI must start with mongodb:// or mongodb+srv://",
                    ));
                }
                if database.is_empty() {
                    return Err(crate::Error::config("Database name cannot be empty"));
                }
                if database.contains(['/', '\\', '.', ' ', '"', '$']) {
                    return Err(crate::Error::config(format!(
                        "Database name contains invalid characters: {}",
                        database
                    )));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Storage timeout must be > 0"));
                }
                collections.validate()
            }
            StorageConfig::File { path, collections } => {
                if path.is_empty() {
                    return Err(crate::Error::config("File store path cannot be empty"));
                }
                collections.validate()
            }
            StorageConfig::Memory => Ok(()),
        }
    }

    /// Get the backend type name used for registry lookup
    pub fn type_name(&self) -> &'static str {
        match self {
            StorageConfig::Mongodb { .. } => "mongodb",
            StorageConfig::File { .. } => "file",
            StorageConfig::Memory => "memory",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Mongodb {
            uri: default_mongodb_uri(),
            database: default_database(),
            collections: CollectionNames::default(),
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

/// Retry configuration for storage operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the second attempt (in milliseconds)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay (in milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Factor applied to the delay after each failed attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl RetryConfig {
    /// Validate the retry configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_attempts == 0 {
            return Err(crate::Error::config("Retry attempts must be >= 1"));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(crate::Error::config(format!(
                "Initial retry delay ({}ms) exceeds max delay ({}ms)",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(crate::Error::config(format!(
                "Retry multiplier must be >= 1.0. Got: {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between the start of two scan cycles (in seconds)
    ///
    /// A cycle that runs longer than the interval pushes the next one back;
    /// cycles never overlap.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound for a single storage call (in seconds)
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config("Scan interval must be > 0"));
        }
        if self.operation_timeout_secs == 0 {
            return Err(crate::Error::config("Operation timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_file_path() -> String {
    DEFAULT_FILE_PATH.to_string()
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_private_collection() -> String {
    AddressClass::Private.default_collection().to_string()
}

fn default_public_collection() -> String {
    AddressClass::Public.default_collection().to_string()
}

fn default_mongodb_uri() -> String {
    DEFAULT_MONGODB_URI.to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_storage_timeout_secs() -> u64 {
    5
}

fn default_max_attempts() -> usize {
    5
}

fn default_initial_delay_ms() -> u64 {
    5000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_interval_secs() -> u64 {
    10
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = IplogConfig::new();
        config.validate().unwrap();

        assert_eq!(config.engine.interval_secs, 10);
        assert_eq!(config.scan.file_path, "data/access.log");
        match &config.storage {
            StorageConfig::Mongodb { uri, database, collections, .. } => {
                assert_eq!(uri, "mongodb://mongodb:27017/");
                assert_eq!(database, "ip_extraction");
                assert_eq!(collections.private, "private_ips");
                assert_eq!(collections.public, "public_ips");
            }
            other => panic!("unexpected default storage: {:?}", other),
        }
    }

    #[test]
    fn rejects_foreign_uri_scheme() {
        let storage = StorageConfig::Mongodb {
            uri: "postgres://localhost/".to_string(),
            database: "ip_extraction".to_string(),
            collections: CollectionNames::default(),
            timeout_secs: 5,
        };
        assert!(matches!(storage.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn rejects_identical_collections() {
        let storage = StorageConfig::File {
            path: "/tmp/ips.json".to_string(),
            collections: CollectionNames {
                private: "ips".to_string(),
                public: "ips".to_string(),
            },
        };
        assert!(storage.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval_and_attempts() {
        let mut config = IplogConfig::new();
        config.engine.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = IplogConfig::new();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: IplogConfig = serde_json::from_str(
            r#"{ "storage": { "type": "file", "path": "/var/lib/iplog/ips.json" } }"#,
        )
        .unwrap();

        assert_eq!(config.storage.type_name(), "file");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.scan.chunk_size, 1024 * 1024);
        assert!(!config.filter.reject_link_local);
        config.validate().unwrap();
    }
}
