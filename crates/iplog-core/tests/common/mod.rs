//! Test doubles and common utilities for contract tests
//!
//! [`FaultyStore`] wraps the in-memory backend and lets a test inject
//! failures or latency while counting every call the engine makes.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iplog_core::config::{IplogConfig, RetryConfig, StorageConfig};
use iplog_core::error::{Error, Result};
use iplog_core::extract::AddressClass;
use iplog_core::store::MemoryIpStore;
use iplog_core::traits::{AddressRecord, IpStore, UpsertCounts};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Shared call counters and fault knobs
#[derive(Debug, Default)]
pub struct StoreCalls {
    /// Remaining pings that fail with StorageUnavailable
    pub failing_pings: AtomicUsize,
    /// Remaining bulk upserts that fail with StorageUnavailable
    pub failing_upserts: AtomicUsize,
    pub ping_calls: AtomicUsize,
    pub upsert_calls: AtomicUsize,
    pub completed_upserts: AtomicUsize,
    pub flush_calls: AtomicUsize,
}

impl StoreCalls {
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn completed_upserts(&self) -> usize {
        self.completed_upserts.load(Ordering::SeqCst)
    }

    pub fn flush_calls(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }
}

/// Decrement `counter` if positive; true when a failure should be injected
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// An IpStore that forwards to [`MemoryIpStore`] with injectable faults
#[derive(Clone)]
pub struct FaultyStore {
    pub inner: MemoryIpStore,
    pub calls: Arc<StoreCalls>,
    upsert_delay: Duration,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryIpStore::new(),
            calls: Arc::new(StoreCalls::default()),
            upsert_delay: Duration::ZERO,
        }
    }

    /// Fail the first `n` bulk upserts
    pub fn failing_upserts(self, n: usize) -> Self {
        self.calls.failing_upserts.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the first `n` pings
    pub fn failing_pings(self, n: usize) -> Self {
        self.calls.failing_pings.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep before every bulk upsert
    pub fn with_upsert_delay(mut self, delay: Duration) -> Self {
        self.upsert_delay = delay;
        self
    }
}

#[async_trait]
impl IpStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    async fn ping(&self) -> Result<()> {
        self.calls.ping_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.calls.failing_pings) {
            return Err(Error::storage_unavailable("connection refused"));
        }
        self.inner.ping().await
    }

    async fn ensure_unique_index(&self, class: AddressClass) -> Result<()> {
        self.inner.ensure_unique_index(class).await
    }

    async fn bulk_upsert(
        &self,
        class: AddressClass,
        ips: &[String],
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertCounts> {
        self.calls.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if !self.upsert_delay.is_zero() {
            tokio::time::sleep(self.upsert_delay).await;
        }
        if take_failure(&self.calls.failing_upserts) {
            return Err(Error::storage_unavailable("connection reset"));
        }
        let counts = self.inner.bulk_upsert(class, ips, seen_at).await?;
        self.calls.completed_upserts.fetch_add(1, Ordering::SeqCst);
        Ok(counts)
    }

    async fn get_record(&self, class: AddressClass, ip: &str) -> Result<Option<AddressRecord>> {
        self.inner.get_record(class, ip).await
    }

    async fn count(&self, class: AddressClass) -> Result<u64> {
        self.inner.count(class).await
    }

    async fn flush(&self) -> Result<()> {
        self.calls.flush_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

/// Config over `log_path` with fast retries and an in-memory backend
pub fn test_config(log_path: &Path) -> IplogConfig {
    let mut config = IplogConfig::new();
    config.scan.file_path = log_path.display().to_string();
    config.storage = StorageConfig::Memory;
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        multiplier: 2.0,
    };
    config.engine.interval_secs = 1;
    config
}

/// Write `contents` to `name` inside `dir`
pub fn write_log(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
