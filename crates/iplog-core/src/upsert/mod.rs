//! Persistence of scan results
//!
//! The [`UpsertCoordinator`] turns each class of a [`ScanResult`] into one
//! bulk insert-or-touch call against the matching collection:
//!
//! ```text
//! ScanResult ──► private set ──► bulk_upsert(Private) ──► private_ips
//!            └─► public set  ──► bulk_upsert(Public)  ──► public_ips
//! ```
//!
//! Every storage call is bounded by a timeout and wrapped in the
//! [`RetryPolicy`]. Bulk upserts are idempotent for a fixed timestamp, so
//! retrying a batch that partially landed is safe.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::extract::AddressClass;
use crate::retry::RetryPolicy;
use crate::scan::ScanResult;
use crate::traits::{IpStore, UpsertCounts};

/// Per-collection outcome of one persistence step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Counts for the private collection
    pub private: UpsertCounts,
    /// Counts for the public collection
    pub public: UpsertCounts,
}

impl PersistReport {
    /// Counts for one class
    pub fn get(&self, class: AddressClass) -> UpsertCounts {
        match class {
            AddressClass::Private => self.private,
            AddressClass::Public => self.public,
        }
    }

    fn set(&mut self, class: AddressClass, counts: UpsertCounts) {
        match class {
            AddressClass::Private => self.private = counts,
            AddressClass::Public => self.public = counts,
        }
    }
}

/// Writes scan results to an [`IpStore`]
pub struct UpsertCoordinator {
    store: Arc<dyn IpStore>,
    retry: RetryPolicy,
    operation_timeout: Duration,
    prepared: AtomicBool,
}

impl UpsertCoordinator {
    /// Create a coordinator over a long-lived store handle
    pub fn new(store: Arc<dyn IpStore>, retry: RetryPolicy, operation_timeout: Duration) -> Self {
        Self {
            store,
            retry,
            operation_timeout,
            prepared: AtomicBool::new(false),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn IpStore> {
        &self.store
    }

    /// Whether the store was reached and indexes exist
    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    /// Ping the store and ensure the unique `ip` indexes
    ///
    /// Runs under the retry policy. On success later calls are no-ops until
    /// a persistence step fails with a storage error.
    pub async fn prepare(&self) -> Result<()> {
        if self.is_prepared() {
            return Ok(());
        }

        let store = &self.store;
        self.retry
            .run("Storage connection", move || self.timed("ping", store.ping()))
            .await?;
        info!("Connected to storage backend: {}", store.backend_name());

        for class in AddressClass::ALL {
            self.retry
                .run("Index creation", move || {
                    self.timed("index creation", store.ensure_unique_index(class))
                })
                .await?;
        }
        info!("Created unique indexes on ip fields");

        self.prepared.store(true, Ordering::Release);
        Ok(())
    }

    /// Persist a scan result, stamping every address with the current time
    pub async fn persist(&self, result: &ScanResult) -> Result<PersistReport> {
        self.persist_at(result, Utc::now()).await
    }

    /// Persist a scan result with an explicit observation time
    ///
    /// Both classes are written with the same `seen_at`. If either batch
    /// fails after all retries the error is returned and the store is
    /// re-prepared before the next attempt.
    pub async fn persist_at(&self, result: &ScanResult, seen_at: DateTime<Utc>) -> Result<PersistReport> {
        self.prepare().await?;

        let mut report = PersistReport::default();

        for class in AddressClass::ALL {
            let ips = result.ips(class);
            if ips.is_empty() {
                debug!("No {} IPs this cycle", class);
                continue;
            }

            let counts = match self.bulk_upsert(class, &ips, seen_at).await {
                Ok(counts) => counts,
                Err(e) => {
                    self.prepared.store(false, Ordering::Release);
                    return Err(e);
                }
            };

            info!(
                "Processed {} {} IPs - Inserted: {}, Updated: {}",
                ips.len(),
                class,
                counts.inserted,
                counts.updated
            );
            report.set(class, counts);
        }

        self.log_totals().await;
        Ok(report)
    }

    async fn bulk_upsert(
        &self,
        class: AddressClass,
        ips: &[String],
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertCounts> {
        let store = &self.store;
        let what = format!("Bulk upsert of {} IPs", class);
        self.retry
            .run(&what, move || {
                self.timed("bulk upsert", store.bulk_upsert(class, ips, seen_at))
            })
            .await
    }

    async fn log_totals(&self) {
        for class in AddressClass::ALL {
            match self.timed("count", self.store.count(class)).await {
                Ok(total) => info!("Total {} IPs stored: {}", class, total),
                Err(e) => warn!("Could not count {} IPs: {}", class, e),
            }
        }
    }

    async fn timed<T>(&self, what: &str, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "{} did not finish within {:?}",
                what, self.operation_timeout
            ))),
        }
    }
}

impl std::fmt::Debug for UpsertCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpsertCoordinator")
            .field("store", &self.store.backend_name())
            .field("retry", &self.retry)
            .field("operation_timeout", &self.operation_timeout)
            .field("prepared", &self.is_prepared())
            .finish()
    }
}
