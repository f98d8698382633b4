// # iplog-core
//
// Core library for the IPv4 log collector.
//
// ## Architecture Overview
//
// Each cycle reads a log file, extracts every IPv4 address it contains and
// records it in one of two collections:
// - **Extraction**: parse dotted quads, drop special-purpose addresses, classify private/public
// - **ScanCycle**: run extraction over newline-aligned chunks in parallel
// - **IpStore**: trait for persistent collections keyed by address
// - **UpsertCoordinator**: insert-or-touch with first_seen/last_seen under retry
// - **ScanEngine**: periodic scheduler with graceful shutdown
// - **StoreRegistry**: plugin-based registry for storage backends
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Pure extraction is separate from I/O and storage
// 2. **Plugin-Based**: Backends are registered dynamically, no hard-coded if-else
// 3. **Library-First**: All core functionality can be used as a library
// 4. **Idempotency**: Re-running a cycle over unchanged content creates no records

pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod registry;
pub mod retry;
pub mod scan;
pub mod store;
pub mod traits;
pub mod upsert;

// Re-export core types for convenience
pub use config::{IplogConfig, RetryConfig, ScanConfig, StorageConfig};
pub use engine::{CycleOutcome, EngineEvent, ScanEngine};
pub use error::{Error, Result};
pub use extract::{AddressClass, FilterPolicy};
pub use registry::StoreRegistry;
pub use retry::RetryPolicy;
pub use scan::{ScanCycle, ScanResult};
pub use store::{FileIpStore, MemoryIpStore};
pub use traits::{AddressRecord, IpStore, UpsertCounts};
pub use upsert::{PersistReport, UpsertCoordinator};
