//! Integration tests for the pruning engine against the seed scenarios.
//!
//! Runs against the in-memory mocks (`test-util` feature) rather than
//! a real backend, since what is under test is the engine's policy,
//! not I/O.

use std::time::Duration;

use chrono::Utc;
use resultcache_core::mock::{MockMetadataStore, MockObjectStore};
use resultcache_core::{CacheConfig, CacheItem, ItemKey, MetadataStore, ObjectStore, StorageKey};

fn resident_item(
    seed: &[u8],
    size_bytes: u64,
    compute_cost: Duration,
    now: chrono::DateTime<Utc>,
) -> CacheItem {
    let key = ItemKey::from_bytes(seed);
    CacheItem::new_resident(
        key,
        StorageKey::new(format!("items/{}.blob", key.to_hex())),
        size_bytes,
        compute_cost,
        now,
        format!("seed:{}", String::from_utf8_lossy(seed)),
    )
}

#[tokio::test]
async fn prune_by_space_evicts_lowest_utility_first_until_exhausted() {
    let metadata = MockMetadataStore::new();
    let objects = MockObjectStore::new(400);
    let now = Utc::now();

    // Utility ~= compute_cost_secs for a just-created, just-accessed
    // item (access_rate ~= 1, storage cost negligible at these sizes).
    let a = resident_item(b"A", 300, Duration::from_millis(100), now);
    let b = resident_item(b"B", 400, Duration::from_millis(900), now);
    let c = resident_item(b"C", 100, Duration::from_millis(500), now);

    for item in [&a, &b, &c] {
        objects.seed_blob(item.storage_key.clone().unwrap(), vec![0u8; item.size_bytes as usize]);
        metadata.upsert(item.clone()).await.unwrap();
    }

    let config = CacheConfig {
        reserved_free_space: 1000,
        ..CacheConfig::default()
    };

    let report = resultcache_core::pruning::prune(&metadata, &objects, &config, false, true, now)
        .await
        .unwrap();

    assert_eq!(report.evicted, vec![a.item_key, c.item_key, b.item_key]);
    assert_eq!(objects.free_space().await.unwrap(), 1200);
    assert!(metadata.iter_resident().await.unwrap().is_empty());
}

#[tokio::test]
async fn orphan_blob_is_swept_without_a_claiming_item() {
    let metadata = MockMetadataStore::new();
    let objects = MockObjectStore::new(1_000_000);
    let orphan_key = StorageKey::new("items/orphan.blob");
    objects.seed_blob(orphan_key.clone(), vec![1, 2, 3]);

    let config = CacheConfig::default();
    let report = resultcache_core::pruning::prune(&metadata, &objects, &config, false, false, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.orphans_removed, 1);
    assert!(!objects.exists(&orphan_key).await.unwrap());
}

#[tokio::test]
async fn zero_size_item_is_never_evicted_to_satisfy_space_pressure() {
    let metadata = MockMetadataStore::new();
    let objects = MockObjectStore::new(0);
    let now = Utc::now();

    // The only resident item is worthless (utility 0) but contributes
    // nothing to free space either way, so the space-driven pass must
    // leave it alone; the reservation simply goes unsatisfied.
    let weightless = resident_item(b"weightless", 0, Duration::ZERO, now);
    objects.seed_blob(weightless.storage_key.clone().unwrap(), Vec::new());
    metadata.upsert(weightless.clone()).await.unwrap();

    let config = CacheConfig {
        reserved_free_space: 1,
        min_utility_to_keep: f64::NEG_INFINITY,
        ..CacheConfig::default()
    };

    let report = resultcache_core::pruning::prune(&metadata, &objects, &config, false, false, now)
        .await
        .unwrap();

    assert!(report.evicted.is_empty());
    assert!(metadata.get(&weightless.item_key).await.unwrap().unwrap().is_resident());
}

#[tokio::test]
async fn prune_cache_clears_access_history_when_requested() {
    let metadata = MockMetadataStore::new();
    let objects = MockObjectStore::new(u64::MAX);
    let now = Utc::now();

    let mut item = resident_item(b"history", 10, Duration::from_secs(1), now);
    for i in 0..9 {
        item.record_access(now + chrono::Duration::seconds(i));
    }
    assert_eq!(item.access_log.len(), 10);
    objects.seed_blob(item.storage_key.clone().unwrap(), vec![0u8; 10]);
    metadata.upsert(item.clone()).await.unwrap();

    let config = CacheConfig::default();
    resultcache_core::pruning::prune(&metadata, &objects, &config, true, false, now)
        .await
        .unwrap();

    let after = metadata.get(&item.item_key).await.unwrap().unwrap();
    assert!(after.access_log.is_empty());
}
