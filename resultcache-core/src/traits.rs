//! External collaborator interfaces the coordinator depends on.
//!
//! The coordinator never references a concrete backend by name — it is
//! written entirely against these four traits, so the local-volume
//! object store, the `sled` metadata store, and any mock used in tests
//! are interchangeable. See `resultcache-store` for the reference
//! backends and `mock` (behind the `test-util` feature) for in-memory
//! ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::types::{CacheItem, ItemKey, StorageKey};

/// Durable record of every item the cache has ever seen, plus
/// configuration. The metadata store is the authoritative record; all
/// mutations the coordinator makes go through it.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Looks up the record for `item_key`, if one exists.
    async fn get(&self, item_key: &ItemKey) -> CacheResult<Option<CacheItem>>;

    /// Atomically replaces the record for `item.item_key`.
    async fn upsert(&self, item: CacheItem) -> CacheResult<()>;

    /// Clears `storage_key` and zeroes `size_bytes` for `item_key`.
    /// A no-op if the item has no record or is already non-resident.
    async fn mark_non_resident(&self, item_key: &ItemKey) -> CacheResult<()>;

    /// A consistent snapshot of every currently-resident item.
    async fn iter_resident(&self) -> CacheResult<Vec<CacheItem>>;

    /// Appends `at` to `item_key`'s access log.
    async fn append_access(&self, item_key: &ItemKey, at: DateTime<Utc>) -> CacheResult<()>;

    /// Clears the access log of every item the store knows about.
    async fn clear_access_logs(&self) -> CacheResult<()>;

    /// Removes the record for `item_key` entirely.
    async fn delete(&self, item_key: &ItemKey) -> CacheResult<()>;

    /// Loads the persisted configuration blob, if one has been stored.
    async fn load_config(&self) -> CacheResult<Option<CacheConfig>>;

    /// Persists `config` as the store's configuration blob.
    async fn store_config(&self, config: &CacheConfig) -> CacheResult<()>;
}

/// Content-indexed blob repository addressed by a storage key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `bytes` at `key` and returns the number of bytes
    /// written. Overwriting an existing key is forbidden: backends
    /// must fail rather than silently replace a blob (storage-key
    /// uniqueness is a cache invariant, not just a convention).
    async fn write(&self, key: &StorageKey, bytes: &[u8]) -> CacheResult<u64>;

    /// Reads the blob at `key`.
    async fn read(&self, key: &StorageKey) -> CacheResult<Vec<u8>>;

    /// Deletes the blob at `key`. Idempotent: deleting an absent key
    /// is not an error.
    async fn delete(&self, key: &StorageKey) -> CacheResult<()>;

    /// Whether a blob is currently stored at `key`.
    async fn exists(&self, key: &StorageKey) -> CacheResult<bool>;

    /// The on-disk size of the blob at `key`, or `None` if absent.
    async fn size(&self, key: &StorageKey) -> CacheResult<Option<u64>>;

    /// Every storage key currently holding a blob. Used by the
    /// pruning engine's orphan sweep.
    async fn iter_keys(&self) -> CacheResult<Vec<StorageKey>>;

    /// Bytes free on the backing volume. Advisory: may change between
    /// this call and a subsequent eviction.
    async fn free_space(&self) -> CacheResult<u64>;
}

/// Caller-supplied bundle of identity, computation, and codec for one
/// cacheable computation. Passed by reference into
/// `CacheCoordinator::get_object` and friends; the coordinator never
/// sees a raw `Object` without knowing how to persist it.
#[async_trait]
pub trait ItemProducer: Send + Sync {
    /// The type of value this producer computes and caches.
    type Object: Send + Sync;

    /// The item's content-addressed identity. Must be stable across
    /// calls for the same logical computation.
    fn get_item_key(&self) -> ItemKey;

    /// Runs the (potentially expensive) computation. Not cancellable;
    /// callers that need a timeout must enforce it inside this method.
    async fn compute_item(&self) -> CacheResult<Self::Object>;

    /// Encodes a computed object for storage.
    fn serialize_item(&self, object: &Self::Object) -> CacheResult<Vec<u8>>;

    /// Decodes a stored blob back into an object. Returning `Err`
    /// triggers the coordinator's corrupt-blob recovery path.
    fn instantiate_item(&self, bytes: &[u8]) -> CacheResult<Self::Object>;

    /// An optional storage key the producer would prefer to use
    /// instead of the default `StorageKeyGenerator`-derived one.
    fn propose_item_storage_key(&self) -> Option<StorageKey> {
        None
    }

    /// A short human label for the item. Defaults to a hex prefix of
    /// the item key when the producer has nothing more descriptive.
    fn pretty_description(&self) -> String {
        let hex = self.get_item_key().to_hex();
        format!("item:{}", &hex[..hex.len().min(16)])
    }
}

/// Derives a storage key from an item key when the producer proposes
/// none. Implementations must be deterministic and collision-resistant
/// (ideally bijective with the item key).
pub trait StorageKeyGenerator: Send + Sync {
    fn derive(&self, item_key: &ItemKey) -> StorageKey;
}
