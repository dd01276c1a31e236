//! Coordinator, pruning engine, and utility model for a persistent,
//! content-addressed cache of expensive computations.
//!
//! This crate defines the policy: what gets kept, what gets evicted,
//! and how a caller gets-or-computes an item. It is written entirely
//! against the [`MetadataStore`] and [`ObjectStore`] traits — see
//! `resultcache-store` for the durable backends, or enable the
//! `test-util` feature for in-memory ones suitable for tests.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod keygen;
pub mod pruning;
pub mod traits;
pub mod types;
pub mod utility;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use config::CacheConfig;
pub use coordinator::CacheCoordinator;
pub use error::{CacheError, CacheResult};
pub use keygen::PrefixedHexKeyGenerator;
pub use pruning::PruneReport;
pub use traits::{ItemProducer, MetadataStore, ObjectStore, StorageKeyGenerator};
pub use types::{CacheItem, ItemKey, StorageKey};
