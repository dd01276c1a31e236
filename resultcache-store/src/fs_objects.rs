//! Filesystem-backed implementation of `ObjectStore`.
//!
//! Each storage key maps to a relative path under a configured root
//! directory, mirroring how the local SSD cache tier this crate is
//! descended from addresses blobs by a composite key under one data
//! directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use resultcache_core::{CacheError, CacheResult, ObjectStore, StorageKey};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// An `ObjectStore` backed by plain files under `root`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Opens (creating if absent) an object store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(FsObjectStore { root })
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.as_str())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn write(&self, key: &StorageKey, bytes: &[u8]) -> CacheResult<u64> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CacheError::InvariantViolation(format!(
                    "storage key already occupied: {key}"
                )));
            }
            Err(err) => return Err(err.into()),
        };

        file.write_all(bytes).await?;
        file.sync_all().await?;
        debug!(storage_key = %key, bytes = bytes.len(), "wrote blob");
        Ok(bytes.len() as u64)
    }

    async fn read(&self, key: &StorageKey) -> CacheResult<Vec<u8>> {
        Ok(tokio::fs::read(self.path_for(key)).await?)
    }

    async fn delete(&self, key: &StorageKey) -> CacheResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, key: &StorageKey) -> CacheResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn size(&self, key: &StorageKey) -> CacheResult<Option<u64>> {
        match tokio::fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn iter_keys(&self) -> CacheResult<Vec<StorageKey>> {
        let mut out = Vec::new();
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    dirs.push(entry.path());
                } else if file_type.is_file() {
                    out.push(self.relative_key(&entry.path()));
                }
            }
        }

        Ok(out)
    }

    async fn free_space(&self) -> CacheResult<u64> {
        fs2::available_space(&self.root).map_err(CacheError::from)
    }
}

impl FsObjectStore {
    fn relative_key(&self, path: &Path) -> StorageKey {
        let rel = path
            .strip_prefix(&self.root)
            .expect("iter_keys only walks paths under root");
        StorageKey::new(rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
    }
}
