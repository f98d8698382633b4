// # Store Implementations
//
// This module provides implementations of the IpStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::{FileIpStore, FileIpStoreFactory};
pub use memory::{MemoryIpStore, MemoryIpStoreFactory};

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::traits::{AddressRecord, UpsertCounts};

/// Apply an insert-or-touch batch to a keyed collection
///
/// The caller holds the write lock for the whole batch, which is what makes
/// the map key a uniqueness constraint for concurrent batches.
pub(crate) fn apply_upsert(
    records: &mut HashMap<String, AddressRecord>,
    ips: &[String],
    seen_at: DateTime<Utc>,
) -> UpsertCounts {
    let mut counts = UpsertCounts::default();

    for ip in ips {
        match records.get_mut(ip) {
            Some(record) => {
                record.touch(seen_at);
                counts.updated += 1;
            }
            None => {
                records.insert(ip.clone(), AddressRecord::new(ip.clone(), seen_at));
                counts.inserted += 1;
            }
        }
    }

    counts
}
