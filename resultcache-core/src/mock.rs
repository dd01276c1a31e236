//! In-memory reference implementations of [`MetadataStore`] and
//! [`ObjectStore`], for exercising the coordinator and pruning engine
//! without a filesystem or `sled` underneath.
//!
//! Gated behind the `test-util` feature (always available to this
//! crate's own `#[cfg(test)]` modules) since it has no place in
//! production use — see `resultcache-store` for the durable backends.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::{MetadataStore, ObjectStore};
use crate::types::{CacheItem, ItemKey, StorageKey};

/// An in-memory object store backed by a `HashMap`, with a
/// configurable advisory free-space figure so tests can drive
/// space-pressure pruning deterministically.
#[derive(Default)]
pub struct MockObjectStore {
    inner: Mutex<MockObjectStoreInner>,
}

#[derive(Default)]
struct MockObjectStoreInner {
    blobs: HashMap<StorageKey, Vec<u8>>,
    free_space: u64,
}

impl MockObjectStore {
    pub fn new(free_space: u64) -> Self {
        MockObjectStore {
            inner: Mutex::new(MockObjectStoreInner {
                blobs: HashMap::new(),
                free_space,
            }),
        }
    }

    /// Overwrites the advisory free-space figure reported by
    /// `free_space()`.
    pub fn set_free_space(&self, bytes: u64) {
        self.inner.lock().unwrap().free_space = bytes;
    }

    /// Writes a blob directly, bypassing the coordinator — for
    /// constructing orphan-blob test fixtures.
    pub fn seed_blob(&self, key: StorageKey, bytes: Vec<u8>) {
        self.inner.lock().unwrap().blobs.insert(key, bytes);
    }

    /// Removes a blob directly, for simulating an external actor
    /// deleting a blob out from under the cache.
    pub fn remove_blob(&self, key: &StorageKey) {
        self.inner.lock().unwrap().blobs.remove(key);
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn write(&self, key: &StorageKey, bytes: &[u8]) -> CacheResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.blobs.contains_key(key) {
            return Err(CacheError::io_failure(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("storage key already occupied: {key}"),
            )));
        }
        let len = bytes.len() as u64;
        inner.blobs.insert(key.clone(), bytes.to_vec());
        if inner.free_space >= len {
            inner.free_space -= len;
        } else {
            inner.free_space = 0;
        }
        Ok(len)
    }

    async fn read(&self, key: &StorageKey) -> CacheResult<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .blobs
            .get(key)
            .cloned()
            .ok_or_else(|| {
                CacheError::io_failure(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no blob at {key}"),
                ))
            })
    }

    async fn delete(&self, key: &StorageKey) -> CacheResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(bytes) = inner.blobs.remove(key) {
            inner.free_space += bytes.len() as u64;
        }
        Ok(())
    }

    async fn exists(&self, key: &StorageKey) -> CacheResult<bool> {
        Ok(self.inner.lock().unwrap().blobs.contains_key(key))
    }

    async fn size(&self, key: &StorageKey) -> CacheResult<Option<u64>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .blobs
            .get(key)
            .map(|b| b.len() as u64))
    }

    async fn iter_keys(&self) -> CacheResult<Vec<StorageKey>> {
        Ok(self.inner.lock().unwrap().blobs.keys().cloned().collect())
    }

    async fn free_space(&self) -> CacheResult<u64> {
        Ok(self.inner.lock().unwrap().free_space)
    }
}

/// An in-memory metadata store backed by a `HashMap`.
#[derive(Default)]
pub struct MockMetadataStore {
    inner: Mutex<MockMetadataStoreInner>,
}

#[derive(Default)]
struct MockMetadataStoreInner {
    items: HashMap<ItemKey, CacheItem>,
    config: Option<CacheConfig>,
}

impl MockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MockMetadataStore {
    async fn get(&self, item_key: &ItemKey) -> CacheResult<Option<CacheItem>> {
        Ok(self.inner.lock().unwrap().items.get(item_key).cloned())
    }

    async fn upsert(&self, item: CacheItem) -> CacheResult<()> {
        self.inner.lock().unwrap().items.insert(item.item_key, item);
        Ok(())
    }

    async fn mark_non_resident(&self, item_key: &ItemKey) -> CacheResult<()> {
        if let Some(item) = self.inner.lock().unwrap().items.get_mut(item_key) {
            item.mark_non_resident();
        }
        Ok(())
    }

    async fn iter_resident(&self) -> CacheResult<Vec<CacheItem>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .items
            .values()
            .filter(|item| item.is_resident())
            .cloned()
            .collect())
    }

    async fn append_access(&self, item_key: &ItemKey, at: DateTime<Utc>) -> CacheResult<()> {
        if let Some(item) = self.inner.lock().unwrap().items.get_mut(item_key) {
            item.record_access(at);
        }
        Ok(())
    }

    async fn clear_access_logs(&self) -> CacheResult<()> {
        for item in self.inner.lock().unwrap().items.values_mut() {
            item.clear_access_log();
        }
        Ok(())
    }

    async fn delete(&self, item_key: &ItemKey) -> CacheResult<()> {
        self.inner.lock().unwrap().items.remove(item_key);
        Ok(())
    }

    async fn load_config(&self) -> CacheResult<Option<CacheConfig>> {
        Ok(self.inner.lock().unwrap().config.clone())
    }

    async fn store_config(&self, config: &CacheConfig) -> CacheResult<()> {
        self.inner.lock().unwrap().config = Some(config.clone());
        Ok(())
    }
}
