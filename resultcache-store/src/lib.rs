//! Reference `MetadataStore` and `ObjectStore` backends for
//! `resultcache-core`: a `sled`-backed metadata store and a
//! filesystem-backed object store.

mod fs_objects;
mod sled_metadata;

pub use fs_objects::FsObjectStore;
pub use sled_metadata::SledMetadataStore;
