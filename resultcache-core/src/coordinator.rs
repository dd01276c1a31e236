//! The cache coordinator: the single entry point callers use to get or
//! compute an item, force a refresh, prune, or forget entirely.
//!
//! All mutating operations serialize through one internal lock. This
//! keeps the metadata/object-store pair consistent without requiring
//! either backend to provide cross-store transactions, at the cost of
//! running get-or-compute calls for distinct items one at a time. See
//! the module-level docs in `pruning` and `utility` for the two pieces
//! the coordinator delegates to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::pruning::{self, PruneReport};
use crate::traits::{ItemProducer, MetadataStore, ObjectStore, StorageKeyGenerator};
use crate::types::{CacheItem, ItemKey, StorageKey};

/// Coordinates a metadata store and an object store into one cache.
///
/// Generic over neither store: both are held as trait objects so a
/// coordinator can be constructed once per process and shared freely
/// via `Arc` or `Clone`.
pub struct CacheCoordinator {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    keygen: Arc<dyn StorageKeyGenerator>,
    config: RwLock<CacheConfig>,
    lock: Mutex<()>,
}

impl CacheCoordinator {
    /// Opens a coordinator over the given stores, loading configuration
    /// from `metadata` (or persisting `CacheConfig::default()` if none
    /// has ever been stored).
    pub async fn open(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        keygen: Arc<dyn StorageKeyGenerator>,
    ) -> CacheResult<Self> {
        let config = match metadata.load_config().await? {
            Some(config) => {
                config.validate()?;
                config
            }
            None => {
                let config = CacheConfig::default();
                metadata.store_config(&config).await?;
                config
            }
        };

        info!(
            cost_of_minute_compute_rel_to_cost_of_1gb = config.cost_of_minute_compute_rel_to_cost_of_1gb,
            reserved_free_space = config.reserved_free_space,
            "cache opened"
        );

        Ok(CacheCoordinator {
            metadata,
            objects,
            keygen,
            config: RwLock::new(config),
            lock: Mutex::new(()),
        })
    }

    /// The coordinator's current configuration.
    pub async fn config(&self) -> CacheConfig {
        self.config.read().await.clone()
    }

    /// Validates and persists a new configuration. Takes effect for the
    /// next call that reads it; in-flight calls use whatever they
    /// already read.
    pub async fn set_config(&self, config: CacheConfig) -> CacheResult<()> {
        config.validate()?;
        self.metadata.store_config(&config).await?;
        *self.config.write().await = config;
        Ok(())
    }

    /// Returns the cached object for `producer`, computing and storing
    /// it first if necessary.
    ///
    /// Failure semantics: if the producer's computation fails, no
    /// metadata is touched and the error is returned as-is. If
    /// computation succeeds but serialization or the blob write fails,
    /// no metadata is touched, any partial blob is removed, and the
    /// error is returned. If a stored blob fails to deserialize or
    /// cannot be read back, the item is demoted to non-resident and
    /// recomputed once; if the producer then fails to instantiate its
    /// own freshly written blob, that is surfaced as `ProducerFailed`
    /// (no further retry).
    pub async fn get_object<P: ItemProducer>(&self, producer: &P) -> CacheResult<P::Object> {
        let _guard = self.lock.lock().await;
        let item_key = producer.get_item_key();
        let now = Utc::now();

        let existing = self.metadata.get(&item_key).await?;

        if let Some(item) = &existing {
            if let Some(storage_key) = &item.storage_key {
                match self.objects.read(storage_key).await {
                    Ok(bytes) => match producer.instantiate_item(&bytes) {
                        Ok(object) => {
                            self.metadata.append_access(&item_key, now).await?;
                            debug!(item = %item_key, "cache hit");
                            return Ok(object);
                        }
                        Err(err) => {
                            warn!(item = %item_key, error = %err, "resident blob failed to deserialize, demoting and recomputing");
                            self.metadata.mark_non_resident(&item_key).await?;
                        }
                    },
                    Err(err) => {
                        warn!(item = %item_key, error = %err, "resident blob unreadable, demoting and recomputing");
                        self.metadata.mark_non_resident(&item_key).await?;
                    }
                }
            }
        }

        debug!(item = %item_key, "cache miss, invoking producer");
        self.compute_and_store(producer, &item_key, existing, now).await
    }

    /// Pure metadata lookup; does not record an access or trigger a
    /// computation.
    pub async fn get_object_info(&self, item_key: &ItemKey) -> CacheResult<Option<CacheItem>> {
        self.metadata.get(item_key).await
    }

    /// Computes and stores `producer`'s item unconditionally, even if
    /// it is already resident. Useful for refreshing a value the
    /// caller knows is stale despite a positive utility score.
    ///
    /// The previous blob, if any, is not deleted until the new one is
    /// durably written and visible in metadata, so a crash mid-refresh
    /// never leaves the item with no blob at all.
    pub async fn add_item_unconditionally<P: ItemProducer>(
        &self,
        producer: &P,
    ) -> CacheResult<CacheItem> {
        let _guard = self.lock.lock().await;
        let item_key = producer.get_item_key();
        let now = Utc::now();
        let existing = self.metadata.get(&item_key).await?;

        self.compute_and_upsert(producer, &item_key, existing, now)
            .await
    }

    /// Runs the full prune algorithm: repairs metadata/object-store
    /// disagreements, sweeps orphan blobs, evicts items below
    /// `min_utility_to_keep`, then evicts lowest-utility items further
    /// until `reserved_free_space` is satisfied. Optionally clears
    /// every item's access history afterward.
    pub async fn prune_cache(&self, remove_history: bool, verbose: bool) -> CacheResult<PruneReport> {
        let _guard = self.lock.lock().await;
        let config = self.config.read().await.clone();
        pruning::prune(
            self.metadata.as_ref(),
            self.objects.as_ref(),
            &config,
            remove_history,
            verbose,
            Utc::now(),
        )
        .await
    }

    /// Removes an item and its blob (if resident) entirely, regardless
    /// of utility. A no-op if the item has no record.
    pub async fn forget(&self, item_key: &ItemKey) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        if let Some(item) = self.metadata.get(item_key).await? {
            if let Some(storage_key) = &item.storage_key {
                self.objects.delete(storage_key).await?;
            }
        }
        self.metadata.delete(item_key).await?;
        Ok(())
    }

    /// Runs the producer, writes its result at a fresh storage key, and
    /// upserts metadata. On failure after a successful blob write,
    /// deletes the orphaned blob before surfacing the error. Used by
    /// the miss path of `get_object`, where no valid resident blob
    /// exists to protect.
    async fn compute_and_store<P: ItemProducer>(
        &self,
        producer: &P,
        item_key: &ItemKey,
        existing: Option<CacheItem>,
        now: DateTime<Utc>,
    ) -> CacheResult<P::Object> {
        let item = self.compute_and_upsert(producer, item_key, existing, now).await?;
        let storage_key = item
            .storage_key
            .as_ref()
            .expect("compute_and_upsert always leaves the item resident");
        let bytes = self.objects.read(storage_key).await?;
        producer.instantiate_item(&bytes).map_err(|err| {
            CacheError::ProducerFailed(format!(
                "producer could not instantiate its own freshly written blob: {err}"
            ))
        })
    }

    /// Shared implementation of the "compute, write, upsert" sequence
    /// used by both the miss path of `get_object` and
    /// `add_item_unconditionally`.
    async fn compute_and_upsert<P: ItemProducer>(
        &self,
        producer: &P,
        item_key: &ItemKey,
        existing: Option<CacheItem>,
        now: DateTime<Utc>,
    ) -> CacheResult<CacheItem> {
        let start = std::time::Instant::now();
        let object = producer.compute_item().await?;
        let compute_cost = start.elapsed();
        let bytes = producer.serialize_item(&object)?;

        let old_storage_key = existing.as_ref().and_then(|i| i.storage_key.clone());
        let storage_key = producer
            .propose_item_storage_key()
            .unwrap_or_else(|| self.next_storage_key(item_key, old_storage_key.as_ref()));

        let size = match self.write_blob_replacing(&storage_key, &bytes).await {
            Ok(size) => size,
            Err(err) => return Err(err),
        };

        let created_at = existing.as_ref().map(|i| i.created_at).unwrap_or(now);
        let mut item = match existing {
            Some(mut item) => {
                item.storage_key = Some(storage_key.clone());
                item.size_bytes = size;
                item.compute_cost = compute_cost;
                item.pretty_description = producer.pretty_description();
                item.record_access(now);
                item
            }
            None => CacheItem::new_resident(
                *item_key,
                storage_key.clone(),
                size,
                compute_cost,
                created_at,
                producer.pretty_description(),
            ),
        };
        item.last_utility = None;

        if let Err(err) = self.metadata.upsert(item.clone()).await {
            if let Err(cleanup_err) = self.objects.delete(&storage_key).await {
                warn!(item = %item_key, storage_key = %storage_key, error = %cleanup_err, "failed to delete orphaned blob after a metadata upsert failure");
            }
            return Err(err);
        }

        if let Some(old_key) = old_storage_key {
            if old_key != storage_key {
                if let Err(err) = self.objects.delete(&old_key).await {
                    warn!(item = %item_key, storage_key = %old_key, error = %err, "failed to delete superseded blob");
                }
            }
        }

        Ok(item)
    }

    /// Writes `bytes` at `key`, first deleting any blob already
    /// occupying it. Safe because `key` only ever collides with a blob
    /// the coordinator has already decided to discard (an orphan left
    /// by a corrupt/missing-blob demotion, or nothing at all).
    async fn write_blob_replacing(&self, key: &StorageKey, bytes: &[u8]) -> CacheResult<u64> {
        if self.objects.exists(key).await? {
            self.objects.delete(key).await?;
        }
        self.objects.write(key, bytes).await
    }

    /// Derives the storage key for a fresh write. When the item has no
    /// prior blob, or its prior blob sits somewhere other than the
    /// generator's canonical key, the canonical key is used. When the
    /// prior blob already occupies the canonical key — the common case
    /// for a refresh — an alternate, distinct key is used instead, so a
    /// `add_item_unconditionally` write never targets the blob it is
    /// about to replace until that replacement is already visible in
    /// metadata.
    fn next_storage_key(&self, item_key: &ItemKey, old: Option<&StorageKey>) -> StorageKey {
        let canonical = self.keygen.derive(item_key);
        match old {
            Some(old_key) if *old_key == canonical => {
                StorageKey::new(format!("{}.refresh", canonical.as_str()))
            }
            _ => canonical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheResult;
    use crate::keygen::PrefixedHexKeyGenerator;
    use crate::mock::{MockMetadataStore, MockObjectStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct CountingProducer {
        key: ItemKey,
        value: Vec<u8>,
        computations: AtomicUsize,
        fail_compute: bool,
    }

    impl CountingProducer {
        fn new(seed: &[u8], value: &[u8]) -> Self {
            CountingProducer {
                key: ItemKey::from_bytes(seed),
                value: value.to_vec(),
                computations: AtomicUsize::new(0),
                fail_compute: false,
            }
        }
    }

    #[async_trait]
    impl ItemProducer for CountingProducer {
        type Object = Vec<u8>;

        fn get_item_key(&self) -> ItemKey {
            self.key
        }

        async fn compute_item(&self) -> CacheResult<Self::Object> {
            self.computations.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail_compute {
                return Err(CacheError::ProducerFailed("boom".to_string()));
            }
            Ok(self.value.clone())
        }

        fn serialize_item(&self, object: &Self::Object) -> CacheResult<Vec<u8>> {
            Ok(object.clone())
        }

        fn instantiate_item(&self, bytes: &[u8]) -> CacheResult<Self::Object> {
            Ok(bytes.to_vec())
        }
    }

    async fn coordinator() -> CacheCoordinator {
        CacheCoordinator::open(
            Arc::new(MockMetadataStore::new()),
            Arc::new(MockObjectStore::new(u64::MAX)),
            Arc::new(PrefixedHexKeyGenerator::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn miss_then_hit_computes_once_and_records_two_accesses() {
        let coord = coordinator().await;
        let producer = CountingProducer::new(b"seed", b"xyz");

        let first = coord.get_object(&producer).await.unwrap();
        assert_eq!(first, b"xyz");
        let second = coord.get_object(&producer).await.unwrap();
        assert_eq!(second, b"xyz");

        assert_eq!(producer.computations.load(AtomicOrdering::SeqCst), 1);
        let info = coord.get_object_info(&producer.get_item_key()).await.unwrap().unwrap();
        assert_eq!(info.access_log.len(), 2);
    }

    #[tokio::test]
    async fn compute_failure_leaves_no_metadata_record() {
        let coord = coordinator().await;
        let mut producer = CountingProducer::new(b"seed", b"xyz");
        producer.fail_compute = true;

        let err = coord.get_object(&producer).await.unwrap_err();
        assert!(matches!(err, CacheError::ProducerFailed(_)));
        assert!(coord.get_object_info(&producer.get_item_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_blob_is_repaired_and_recomputed() {
        let coord = coordinator().await;
        let producer = CountingProducer::new(b"seed", b"xyz");
        coord.get_object(&producer).await.unwrap();

        let item = coord.get_object_info(&producer.get_item_key()).await.unwrap().unwrap();
        let storage_key = item.storage_key.clone().unwrap();
        coord.objects.delete(&storage_key).await.unwrap();

        let value = coord.get_object(&producer).await.unwrap();
        assert_eq!(value, b"xyz");
        assert_eq!(producer.computations.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn forget_removes_metadata_and_blob() {
        let coord = coordinator().await;
        let producer = CountingProducer::new(b"seed", b"xyz");
        coord.get_object(&producer).await.unwrap();

        let item = coord.get_object_info(&producer.get_item_key()).await.unwrap().unwrap();
        let storage_key = item.storage_key.unwrap();

        coord.forget(&producer.get_item_key()).await.unwrap();
        assert!(coord.get_object_info(&producer.get_item_key()).await.unwrap().is_none());
        assert!(!coord.objects.exists(&storage_key).await.unwrap());
    }

    #[tokio::test]
    async fn add_item_unconditionally_recomputes_and_preserves_created_at() {
        let coord = coordinator().await;
        let producer = CountingProducer::new(b"seed", b"v1");
        coord.get_object(&producer).await.unwrap();
        let first = coord.get_object_info(&producer.get_item_key()).await.unwrap().unwrap();

        let refreshed_producer = CountingProducer::new(b"seed", b"v2");
        let refreshed = coord.add_item_unconditionally(&refreshed_producer).await.unwrap();

        assert_eq!(refreshed.created_at, first.created_at);
        assert_ne!(refreshed.storage_key, first.storage_key);
        let value = coord.get_object(&refreshed_producer).await.unwrap();
        assert_eq!(value, b"v2");
    }
}
