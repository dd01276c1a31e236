//! `sled`-backed implementation of `MetadataStore`.
//!
//! Each item is stored under a `item:`-prefixed key so a prefix scan
//! yields exactly the item records, leaving the `config` key free for
//! the persisted `CacheConfig`. Mirrors the embedded-`sled`-database
//! pattern of the local SSD cache tier this crate is descended from.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resultcache_core::{CacheConfig, CacheError, CacheItem, CacheResult, ItemKey, MetadataStore};
use tracing::debug;

const CONFIG_KEY: &[u8] = b"config";
const ITEM_PREFIX: &[u8] = b"item:";

fn item_key_bytes(item_key: &ItemKey) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ITEM_PREFIX.len() + 32);
    bytes.extend_from_slice(ITEM_PREFIX);
    bytes.extend_from_slice(item_key.as_bytes());
    bytes
}

fn decode_item(item_key: &ItemKey, bytes: &[u8]) -> CacheResult<CacheItem> {
    bincode::deserialize(bytes).map_err(|err| CacheError::CorruptBlob {
        item: *item_key,
        reason: err.to_string(),
    })
}

/// A `MetadataStore` backed by a single `sled::Db`.
pub struct SledMetadataStore {
    db: sled::Db,
}

impl SledMetadataStore {
    /// Opens (creating if absent) a `sled` database at `path`.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let db = sled::open(path).map_err(CacheError::io_failure)?;
        Ok(SledMetadataStore { db })
    }

    async fn put(&self, item: &CacheItem) -> CacheResult<()> {
        let bytes = bincode::serialize(item).map_err(CacheError::io_failure)?;
        self.db
            .insert(item_key_bytes(&item.item_key), bytes)
            .map_err(CacheError::io_failure)?;
        self.db.flush_async().await.map_err(CacheError::io_failure)?;
        Ok(())
    }

    fn scan_items(&self) -> CacheResult<Vec<CacheItem>> {
        let mut items = Vec::new();
        for entry in self.db.scan_prefix(ITEM_PREFIX) {
            let (key, bytes) = entry.map_err(CacheError::io_failure)?;
            let item_key = ItemKey::from_digest(
                key[ITEM_PREFIX.len()..]
                    .try_into()
                    .expect("item keys are always stored as 32-byte digests"),
            );
            items.push(decode_item(&item_key, &bytes)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl MetadataStore for SledMetadataStore {
    async fn get(&self, item_key: &ItemKey) -> CacheResult<Option<CacheItem>> {
        match self
            .db
            .get(item_key_bytes(item_key))
            .map_err(CacheError::io_failure)?
        {
            Some(bytes) => Ok(Some(decode_item(item_key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, item: CacheItem) -> CacheResult<()> {
        self.put(&item).await
    }

    async fn mark_non_resident(&self, item_key: &ItemKey) -> CacheResult<()> {
        if let Some(mut item) = self.get(item_key).await? {
            item.mark_non_resident();
            self.put(&item).await?;
        }
        Ok(())
    }

    async fn iter_resident(&self) -> CacheResult<Vec<CacheItem>> {
        Ok(self
            .scan_items()?
            .into_iter()
            .filter(|item| item.is_resident())
            .collect())
    }

    async fn append_access(&self, item_key: &ItemKey, at: DateTime<Utc>) -> CacheResult<()> {
        if let Some(mut item) = self.get(item_key).await? {
            item.record_access(at);
            self.put(&item).await?;
        }
        Ok(())
    }

    async fn clear_access_logs(&self) -> CacheResult<()> {
        for mut item in self.scan_items()? {
            item.clear_access_log();
            self.put(&item).await?;
        }
        debug!("cleared access logs for all items");
        Ok(())
    }

    async fn delete(&self, item_key: &ItemKey) -> CacheResult<()> {
        self.db
            .remove(item_key_bytes(item_key))
            .map_err(CacheError::io_failure)?;
        Ok(())
    }

    async fn load_config(&self) -> CacheResult<Option<CacheConfig>> {
        match self.db.get(CONFIG_KEY).map_err(CacheError::io_failure)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(CacheError::io_failure)?,
            )),
            None => Ok(None),
        }
    }

    async fn store_config(&self, config: &CacheConfig) -> CacheResult<()> {
        let bytes = bincode::serialize(config).map_err(CacheError::io_failure)?;
        self.db
            .insert(CONFIG_KEY, bytes)
            .map_err(CacheError::io_failure)?;
        self.db.flush_async().await.map_err(CacheError::io_failure)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn open_temp() -> (tempfile::TempDir, SledMetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledMetadataStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn roundtrips_an_item() {
        let (_dir, store) = open_temp();
        let item = CacheItem::new_resident(
            ItemKey::from_bytes(b"seed"),
            resultcache_core::StorageKey::new("items/seed.blob"),
            128,
            Duration::from_secs(5),
            Utc::now(),
            "seed item".to_string(),
        );
        store.upsert(item.clone()).await.unwrap();

        let fetched = store.get(&item.item_key).await.unwrap().unwrap();
        assert_eq!(fetched.size_bytes, 128);
        assert!(fetched.is_resident());
    }

    #[tokio::test]
    async fn mark_non_resident_clears_storage_key() {
        let (_dir, store) = open_temp();
        let item = CacheItem::new_resident(
            ItemKey::from_bytes(b"seed"),
            resultcache_core::StorageKey::new("items/seed.blob"),
            128,
            Duration::from_secs(5),
            Utc::now(),
            "seed item".to_string(),
        );
        store.upsert(item.clone()).await.unwrap();
        store.mark_non_resident(&item.item_key).await.unwrap();

        let fetched = store.get(&item.item_key).await.unwrap().unwrap();
        assert!(!fetched.is_resident());
        assert_eq!(fetched.size_bytes, 0);
    }

    #[tokio::test]
    async fn config_round_trips_independent_of_items() {
        let (_dir, store) = open_temp();
        assert!(store.load_config().await.unwrap().is_none());

        let config = CacheConfig {
            reserved_free_space: 1024,
            ..CacheConfig::default()
        };
        store.store_config(&config).await.unwrap();
        assert_eq!(store.load_config().await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn iter_resident_excludes_non_resident_items() {
        let (_dir, store) = open_temp();
        let resident = CacheItem::new_resident(
            ItemKey::from_bytes(b"a"),
            resultcache_core::StorageKey::new("items/a.blob"),
            10,
            Duration::from_secs(1),
            Utc::now(),
            "a".to_string(),
        );
        let mut non_resident = CacheItem::new_resident(
            ItemKey::from_bytes(b"b"),
            resultcache_core::StorageKey::new("items/b.blob"),
            10,
            Duration::from_secs(1),
            Utc::now(),
            "b".to_string(),
        );
        non_resident.mark_non_resident();

        store.upsert(resident.clone()).await.unwrap();
        store.upsert(non_resident).await.unwrap();

        let resident_items = store.iter_resident().await.unwrap();
        assert_eq!(resident_items.len(), 1);
        assert_eq!(resident_items[0].item_key, resident.item_key);
    }
}
