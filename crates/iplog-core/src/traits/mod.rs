//! Core traits for the iplog worker
//!
//! This module defines the abstract interfaces that storage backends must follow.
//!
//! - [`IpStore`]: Durable collections of address records with unique `ip` keys

pub mod ip_store;

pub use ip_store::{AddressRecord, IpStore, IpStoreFactory, UpsertCounts};
