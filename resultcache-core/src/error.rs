//! Error taxonomy for cache operations.

use thiserror::Error;

use crate::types::ItemKey;

/// The error kinds a cache operation can surface.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `item_key` was never seen, or its resident blob is missing after
    /// repair was attempted.
    #[error("item not found: {0}")]
    NotFound(ItemKey),

    /// An underlying store (metadata or object) failed on I/O.
    #[error("store I/O failure: {source}")]
    IoFailure {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Deserialization refused to reconstruct the object from its blob.
    #[error("blob for item {item} could not be deserialized: {reason}")]
    CorruptBlob { item: ItemKey, reason: String },

    /// The producer's `compute_item` or `serialize_item` raised.
    #[error("producer failed: {0}")]
    ProducerFailed(String),

    /// Metadata and object store disagree in a way prune could not
    /// repair.
    #[error("cache invariant violated: {0}")]
    InvariantViolation(String),

    /// A `CacheConfig` value was out of range.
    #[error("invalid cache configuration: {0}")]
    ConfigError(String),
}

impl CacheError {
    /// Wraps any store-layer error (filesystem, `sled`, serialization)
    /// as an `IoFailure`, keeping one taxonomy entry for every
    /// "the backend could not complete the operation" case.
    pub fn io_failure<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CacheError::IoFailure {
            source: Box::new(err),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::io_failure(err)
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
