//! Scan scheduler
//!
//! The ScanEngine is responsible for:
//! - Triggering one scan cycle per interval
//! - Never letting two cycles overlap
//! - Skipping cycles whose file or storage is unavailable
//! - Finishing the in-flight cycle before honoring shutdown
//! - Flushing the store before exiting
//!
//! ## Architecture
//!
//! ```text
//!   interval tick
//!        │
//!        ▼
//! ┌──────────────┐   ScanResult   ┌───────────────────┐
//! │  ScanCycle   │───────────────►│ UpsertCoordinator │──► IpStore
//! └──────────────┘                └───────────────────┘
//!        │                                  │
//!        └────────────► EngineEvent ◄───────┘
//! ```
//!
//! ## Cycle Flow
//!
//! 1. Tick fires (the first one immediately)
//! 2. Read and parse the log file; on failure emit `CycleSkipped`
//! 3. Persist both classes; on failure emit `PersistFailed`
//! 4. Emit `CycleCompleted` with the inserted/updated counts
//! 5. Wait for the next tick or shutdown

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::config::IplogConfig;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::scan::ScanCycle;
use crate::traits::{IpStore, UpsertCounts};
use crate::upsert::{PersistReport, UpsertCoordinator};

/// Events emitted by the ScanEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        file_path: String,
        interval_secs: u64,
    },

    /// A cycle persisted its addresses
    CycleCompleted {
        cycle: u64,
        private: UpsertCounts,
        public: UpsertCounts,
    },

    /// A cycle could not read the log file
    CycleSkipped {
        cycle: u64,
        reason: String,
    },

    /// A cycle read the file but could not persist
    PersistFailed {
        cycle: u64,
        error: String,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Result of a single cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Addresses were persisted
    Completed(PersistReport),
    /// The file was unavailable; nothing was written
    Skipped(String),
    /// Persistence failed after all retries
    Failed(String),
}

/// Periodic scan-and-persist loop
///
/// ## Lifecycle
///
/// 1. Create with [`ScanEngine::new()`]
/// 2. Start with [`ScanEngine::run_until()`] or [`ScanEngine::run_with_shutdown()`]
/// 3. Engine runs until the shutdown future resolves
/// 4. The in-flight cycle completes, the store is flushed, `run_until` returns
///
/// Cycles run sequentially on the calling task; only parsing fans out to
/// the scan pool.
pub struct ScanEngine {
    scan: ScanCycle,
    coordinator: UpsertCoordinator,
    file_path: PathBuf,
    interval: Duration,
    cycles: AtomicU64,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ScanEngine {
    /// Create a new engine over a long-lived store handle
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        store: Arc<dyn IpStore>,
        config: IplogConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let coordinator = UpsertCoordinator::new(
            store,
            RetryPolicy::from(&config.retry),
            Duration::from_secs(config.engine.operation_timeout_secs),
        );

        let engine = Self {
            scan: ScanCycle::new(&config.scan, config.filter)?,
            coordinator,
            file_path: PathBuf::from(&config.scan.file_path),
            interval: Duration::from_secs(config.engine.interval_secs),
            cycles: AtomicU64::new(0),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// The coordinator used for persistence
    pub fn coordinator(&self) -> &UpsertCoordinator {
        &self.coordinator
    }

    /// Number of cycles started so far
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Run until `shutdown_rx` fires or its sender is dropped
    pub async fn run_with_shutdown(&self, shutdown_rx: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
        self.run_until(async move {
            let _ = shutdown_rx.await;
        })
        .await
    }

    /// Run until `shutdown` resolves
    ///
    /// Shutdown is only observed between cycles, so a cycle that has started
    /// always reaches the end of its persistence step.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            "Scanning {} every {:?}",
            self.file_path.display(),
            self.interval
        );
        self.emit_event(EngineEvent::Started {
            file_path: self.file_path.display().to_string(),
            interval_secs: self.interval.as_secs(),
        });

        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown signal received during startup");
                return self.stop("Shutdown signal").await;
            }

            prepared = self.coordinator.prepare() => {
                if let Err(e) = prepared {
                    warn!("Storage not ready at startup: {}. Retrying before the next persistence.", e);
                }
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = ticker.tick() => {}
            }

            // Not raced against shutdown
            self.run_once().await;
        }

        self.stop("Shutdown signal").await
    }

    /// Run exactly one scan-and-persist cycle
    pub async fn run_once(&self) -> CycleOutcome {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Starting cycle {}", cycle);

        let result = match self.scan.run(&self.file_path).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Skipping cycle {}: {}", cycle, e);
                self.emit_event(EngineEvent::CycleSkipped {
                    cycle,
                    reason: e.to_string(),
                });
                return CycleOutcome::Skipped(e.to_string());
            }
        };

        info!(
            "Cycle {}: {} private IPs, {} public IPs",
            cycle,
            result.private_ips().len(),
            result.public_ips().len()
        );

        match self.coordinator.persist(&result).await {
            Ok(report) => {
                self.emit_event(EngineEvent::CycleCompleted {
                    cycle,
                    private: report.private,
                    public: report.public,
                });
                CycleOutcome::Completed(report)
            }
            Err(e) => {
                error!("Cycle {} persistence failed: {}", cycle, e);
                self.emit_event(EngineEvent::PersistFailed {
                    cycle,
                    error: e.to_string(),
                });
                CycleOutcome::Failed(e.to_string())
            }
        }
    }

    async fn stop(&self, reason: &str) -> Result<()> {
        self.emit_event(EngineEvent::Stopped {
            reason: reason.to_string(),
        });

        self.coordinator.store().flush().await?;
        info!("Store flushed, engine stopped");
        Ok(())
    }

    /// Emit an engine event without blocking the loop
    fn emit_event(&self, event: EngineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            Err(TrySendError::Closed(_)) => {
                trace!("No event receiver, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::store::MemoryIpStore;

    fn config(file_path: &std::path::Path) -> IplogConfig {
        let mut config = IplogConfig::new();
        config.storage = StorageConfig::Memory;
        config.scan.file_path = file_path.display().to_string();
        config
    }

    #[tokio::test]
    async fn run_once_skips_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryIpStore::new();
        let (engine, mut events) =
            ScanEngine::new(Arc::new(store), config(&dir.path().join("absent.log"))).unwrap();

        let outcome = engine.run_once().await;

        assert!(matches!(outcome, CycleOutcome::Skipped(_)));
        assert!(matches!(
            events.try_recv(),
            Ok(EngineEvent::CycleSkipped { cycle: 1, .. })
        ));
        assert_eq!(engine.cycles(), 1);
    }

    #[tokio::test]
    async fn run_once_persists_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "10.0.0.5 GET /\n8.8.8.8 GET /\n").unwrap();

        let store = MemoryIpStore::new();
        let (engine, _events) = ScanEngine::new(Arc::new(store.clone()), config(&path)).unwrap();

        let outcome = engine.run_once().await;
        match outcome {
            CycleOutcome::Completed(report) => {
                assert_eq!(report.private, UpsertCounts::new(1, 0));
                assert_eq!(report.public, UpsertCounts::new(1, 0));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = IplogConfig::new();
        config.engine.interval_secs = 0;
        assert!(ScanEngine::new(Arc::new(MemoryIpStore::new()), config).is_err());
    }
}
