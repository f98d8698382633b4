//! Contract Test: One Record Per Address
//!
//! Constraints verified:
//! - Overlapping batches persisted concurrently produce one record per ip
//! - A batch listing the same ip twice produces one record
//! - The inserted/updated split always adds up to the batch size

mod common;

use chrono::Utc;
use common::*;
use iplog_core::extract::AddressClass;
use iplog_core::retry::RetryPolicy;
use iplog_core::scan::ScanResult;
use iplog_core::traits::IpStore;
use iplog_core::upsert::UpsertCoordinator;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

fn result_with(public: &[Ipv4Addr]) -> ScanResult {
    let mut result = ScanResult::default();
    for ip in public {
        result.insert(AddressClass::Public, *ip);
    }
    result
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_persists_keep_one_record() {
    let store: Arc<dyn IpStore> = Arc::new(FaultyStore::new());
    let shared = Ipv4Addr::new(8, 8, 8, 8);

    let mut handles = Vec::new();
    for n in 0..8u8 {
        let coordinator = UpsertCoordinator::new(
            Arc::clone(&store),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
            Duration::from_secs(5),
        );
        let result = result_with(&[shared, Ipv4Addr::new(1, 1, 1, n)]);
        handles.push(tokio::spawn(async move { coordinator.persist(&result).await }));
    }

    let mut inserted = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.public.total(), 2);
        inserted += report.public.inserted;
    }

    // 8 distinct 1.1.1.n plus exactly one 8.8.8.8
    assert_eq!(inserted, 9);
    assert_eq!(store.count(AddressClass::Public).await.unwrap(), 9);
    assert!(
        store
            .get_record(AddressClass::Public, "8.8.8.8")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn duplicate_ip_in_batch_is_one_record() {
    let store = FaultyStore::new();
    let ips = vec!["9.9.9.9".to_string(), "9.9.9.9".to_string()];

    let counts = store
        .bulk_upsert(AddressClass::Public, &ips, Utc::now())
        .await
        .unwrap();

    assert_eq!(counts.total(), 2);
    assert_eq!(store.count(AddressClass::Public).await.unwrap(), 1);
}

#[tokio::test]
async fn collections_are_independent() {
    let store = FaultyStore::new();
    let ips = vec!["10.0.0.1".to_string()];
    let now = Utc::now();

    store.bulk_upsert(AddressClass::Private, &ips, now).await.unwrap();

    assert_eq!(store.count(AddressClass::Private).await.unwrap(), 1);
    assert_eq!(store.count(AddressClass::Public).await.unwrap(), 0);
}
