//! Contract Test: Scan → Classify → Persist
//!
//! Constraints verified:
//! - Private and public addresses land in their own collections
//! - Special-purpose addresses are never stored
//! - A new address gets first_seen == last_seen
//! - Re-scanning unchanged content creates no records and only advances last_seen

mod common;

use chrono::{Duration, Utc};
use common::*;
use iplog_core::extract::AddressClass;
use iplog_core::scan::ScanCycle;
use iplog_core::traits::{IpStore, UpsertCounts};
use iplog_core::{CycleOutcome, ScanEngine};
use std::sync::Arc;

const LOG: &str = "\
10.0.0.5 - - [10/Oct/2024:13:55:36] \"GET / HTTP/1.1\" 200\n\
8.8.8.8 - - [10/Oct/2024:13:55:37] \"GET /a HTTP/1.1\" 404\n\
224.0.0.5 - - [10/Oct/2024:13:55:38] \"GET /b HTTP/1.1\" 200\n";

#[tokio::test]
async fn first_cycle_inserts_each_class() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log(dir.path(), "access.log", LOG);
    let store = FaultyStore::new();

    let (engine, _events) =
        ScanEngine::new(Arc::new(store.clone()), test_config(&path)).unwrap();

    let outcome = engine.run_once().await;
    let CycleOutcome::Completed(report) = outcome else {
        panic!("cycle should complete: {:?}", outcome);
    };
    assert_eq!(report.private, UpsertCounts::new(1, 0));
    assert_eq!(report.public, UpsertCounts::new(1, 0));

    let private = store.inner.records(AddressClass::Private).await;
    let public = store.inner.records(AddressClass::Public).await;
    assert_eq!(private.len(), 1);
    assert_eq!(public.len(), 1);
    assert_eq!(private[0].ip, "10.0.0.5");
    assert_eq!(public[0].ip, "8.8.8.8");
    assert_eq!(private[0].first_seen, private[0].last_seen);

    assert!(
        store
            .get_record(AddressClass::Public, "224.0.0.5")
            .await
            .unwrap()
            .is_none(),
        "multicast addresses are never stored"
    );
}

#[tokio::test]
async fn rescanning_unchanged_file_only_touches() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log(dir.path(), "access.log", LOG);
    let store = FaultyStore::new();
    let (engine, _events) =
        ScanEngine::new(Arc::new(store.clone()), test_config(&path)).unwrap();

    engine.run_once().await;
    let before = store
        .get_record(AddressClass::Public, "8.8.8.8")
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let outcome = engine.run_once().await;
    let CycleOutcome::Completed(report) = outcome else {
        panic!("cycle should complete: {:?}", outcome);
    };
    assert_eq!(report.private, UpsertCounts::new(0, 1));
    assert_eq!(report.public, UpsertCounts::new(0, 1));

    let after = store
        .get_record(AddressClass::Public, "8.8.8.8")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.first_seen, before.first_seen);
    assert!(after.last_seen > before.last_seen);
    assert_eq!(store.count(AddressClass::Public).await.unwrap(), 1);
    assert_eq!(store.count(AddressClass::Private).await.unwrap(), 1);
}

#[tokio::test]
async fn scan_is_independent_of_chunking() {
    let dir = tempfile::tempdir().unwrap();
    let mut contents = String::new();
    for i in 0..2_000u32 {
        contents.push_str(&format!(
            "10.{}.{}.1 -> 8.8.{}.{} GET /\n",
            i % 7,
            i % 11,
            i % 13,
            i % 17
        ));
    }
    let path = write_log(dir.path(), "big.log", &contents);

    let mut small = test_config(&path).scan;
    small.chunk_size = 64;
    let mut whole = test_config(&path).scan;
    whole.chunk_size = 1 << 24;

    let policy = Default::default();
    let chunked = ScanCycle::new(&small, policy).unwrap().run(&path).await.unwrap();
    let single = ScanCycle::new(&whole, policy).unwrap().run(&path).await.unwrap();

    assert_eq!(chunked, single);
    assert_eq!(chunked.private_ips().len(), 7 * 11);
    assert_eq!(chunked.public_ips().len(), 13 * 17);
}

#[tokio::test]
async fn touch_with_older_timestamp_keeps_last_seen() {
    let store = FaultyStore::new();
    let now = Utc::now();
    let ips = vec!["8.8.8.8".to_string()];

    store.bulk_upsert(AddressClass::Public, &ips, now).await.unwrap();
    store
        .bulk_upsert(AddressClass::Public, &ips, now - Duration::seconds(30))
        .await
        .unwrap();

    let record = store
        .get_record(AddressClass::Public, "8.8.8.8")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.last_seen, now);
    assert!(record.first_seen <= record.last_seen);
}
