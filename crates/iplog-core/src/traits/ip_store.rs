// # IP Store Trait
//
// Defines the interface for durable address storage.
//
// ## Purpose
//
// A store holds two logical collections (private and public), each keyed by
// the canonical dotted-quad `ip`. Records are created on first observation
// and only their `last_seen` timestamp moves afterwards.
//
// ## Implementations
//
// - In-memory: `MemoryIpStore` (tests, ephemeral runs)
// - JSON file: `FileIpStore`
// - MongoDB: `iplog-store-mongodb` crate
//
// ## Usage
//
// ```rust,ignore
// use iplog_core::{AddressClass, IpStore};
//
// let counts = store
//     .bulk_upsert(AddressClass::Public, &["8.8.8.8".to_string()], chrono::Utc::now())
//     .await?;
// println!("inserted={} updated={}", counts.inserted, counts.updated);
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::extract::AddressClass;

/// A persisted address
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AddressRecord {
    /// Canonical dotted-quad form
    pub ip: String,
    /// First cycle that observed the address
    pub first_seen: DateTime<Utc>,
    /// Most recent cycle that observed the address
    pub last_seen: DateTime<Utc>,
}

impl AddressRecord {
    /// Create a record for a first observation
    pub fn new(ip: impl Into<String>, seen_at: DateTime<Utc>) -> Self {
        Self {
            ip: ip.into(),
            first_seen: seen_at,
            last_seen: seen_at,
        }
    }

    /// Register a later observation
    ///
    /// `first_seen` never moves. `last_seen` only moves forward, so an
    /// out-of-order write from an overlapping cycle cannot break
    /// `first_seen <= last_seen`.
    pub fn touch(&mut self, seen_at: DateTime<Utc>) {
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
    }
}

/// Outcome of an upsert batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UpsertCounts {
    /// Records created by this batch
    pub inserted: u64,
    /// Existing records whose `last_seen` was refreshed
    pub updated: u64,
}

impl UpsertCounts {
    /// Create counts
    pub fn new(inserted: u64, updated: u64) -> Self {
        Self { inserted, updated }
    }

    /// Number of addresses the batch touched
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

impl Add for UpsertCounts {
    type Output = UpsertCounts;

    fn add(self, rhs: Self) -> Self::Output {
        UpsertCounts {
            inserted: self.inserted + rhs.inserted,
            updated: self.updated + rhs.updated,
        }
    }
}

impl AddAssign for UpsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Trait for storage backends
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Uniqueness
///
/// Every backend must guarantee at most one record per `ip` per collection,
/// even when two batches race on the same new address. The losing side may
/// either turn into an update or fail with [`crate::Error::DuplicateKey`],
/// which callers treat as transient and retry.
///
/// # Retries
///
/// Backends execute one attempt per call. Retry and backoff belong to
/// [`crate::UpsertCoordinator`].
#[async_trait]
pub trait IpStore: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<(), crate::Error>;

    /// Create the unique index on `ip` for a collection (idempotent)
    async fn ensure_unique_index(&self, class: AddressClass) -> Result<(), crate::Error>;

    /// Insert-or-touch every address of `ips` in one round trip
    ///
    /// Missing addresses are created with `first_seen = last_seen = seen_at`;
    /// existing ones only get `last_seen` advanced to `seen_at`.
    ///
    /// # Returns
    ///
    /// - `Ok(UpsertCounts)`: How many records were created vs. refreshed
    /// - `Err(Error)`: Storage error (the batch may be retried as a whole)
    async fn bulk_upsert(
        &self,
        class: AddressClass,
        ips: &[String],
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertCounts, crate::Error>;

    /// Insert-or-touch a single address
    async fn upsert(
        &self,
        class: AddressClass,
        ip: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertCounts, crate::Error> {
        self.bulk_upsert(class, &[ip.to_string()], seen_at).await
    }

    /// Fetch the record for `ip`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(AddressRecord))`: The stored record
    /// - `Ok(None)`: Address never observed
    /// - `Err(Error)`: Storage error
    async fn get_record(
        &self,
        class: AddressClass,
        ip: &str,
    ) -> Result<Option<AddressRecord>, crate::Error>;

    /// Number of records in a collection
    async fn count(&self, class: AddressClass) -> Result<u64, crate::Error>;

    /// Persist any pending changes
    ///
    /// Called once on shutdown. Backends without buffering return `Ok(())`.
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing stores from configuration
#[async_trait]
pub trait IpStoreFactory: Send + Sync {
    /// Create an IpStore instance from configuration
    ///
    /// Only configuration problems should fail here; an unreachable server
    /// is reported later by [`IpStore::ping`].
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn IpStore>, crate::Error>;
}
