//! Core data types: item identity, storage handles, and per-item metadata.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on the number of access timestamps retained per item.
///
/// The utility model's decay window makes accesses older than a handful
/// of half-lives negligible, so unbounded history growth is wasted
/// storage. See `CacheItem::record_access`.
pub const MAX_ACCESS_LOG_LEN: usize = 256;

/// Opaque content digest identifying one cacheable computation.
///
/// Wraps a `blake3::Hash`: fixed-width, comparable, and cheap to print
/// as hex. Callers that already have a content-hash collaborator of
/// their own can still use this type by constructing it from raw
/// digest bytes via [`ItemKey::from_digest`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemKey(blake3::Hash);

// `blake3::Hash` only implements a constant-time `PartialEq`/`Eq` and
// deliberately has no `Ord`/`PartialOrd` (a lexicographic comparison
// over a digest isn't constant-time). The eviction tie-break needs a
// total order over item keys, not a secret-independent one, so we
// compare the raw bytes directly rather than deriving.
impl PartialOrd for ItemKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl ItemKey {
    /// Hashes `bytes` to produce an item key.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        ItemKey(blake3::hash(bytes))
    }

    /// Wraps an already-computed 32-byte digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        ItemKey(blake3::Hash::from(digest))
    }

    /// Hex representation, e.g. for use in a storage-key prefix.
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemKey({})", self.to_hex())
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ItemKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ItemKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        let mut digest = [0u8; 32];
        hex::decode_to_slice(&hex, &mut digest).map_err(serde::de::Error::custom)?;
        Ok(ItemKey::from_digest(digest))
    }
}

/// Opaque handle understood by the object store; one-to-one with a
/// resident blob. Commonly a relative path, but the type makes no
/// assumption about the backend's addressing scheme.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(raw: impl Into<String>) -> Self {
        StorageKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) mod duration_secs {
    //! `compute_cost` is a `Duration`, which has no native `serde` impl;
    //! we persist it as fractional seconds, matching how the rest of the
    //! metadata record is a flat, human-inspectable shape.
    use std::time::Duration;
    use serde::Deserialize;

    pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// The metadata record for a key the cache has ever observed, present
/// or evicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheItem {
    pub item_key: ItemKey,
    /// Absent when the item is not currently resident.
    pub storage_key: Option<StorageKey>,
    /// Zero iff not resident.
    pub size_bytes: u64,
    #[serde(with = "duration_secs")]
    pub compute_cost: Duration,
    pub created_at: DateTime<Utc>,
    /// Ordered, monotonically non-decreasing access timestamps.
    pub access_log: Vec<DateTime<Utc>>,
    /// Cached utility; `None` means invalidated and due for recompute.
    pub last_utility: Option<f64>,
    pub pretty_description: String,
}

impl CacheItem {
    /// Creates the record for an item on its first successful
    /// computation.
    pub fn new_resident(
        item_key: ItemKey,
        storage_key: StorageKey,
        size_bytes: u64,
        compute_cost: Duration,
        now: DateTime<Utc>,
        pretty_description: String,
    ) -> Self {
        CacheItem {
            item_key,
            storage_key: Some(storage_key),
            size_bytes,
            compute_cost,
            created_at: now,
            access_log: vec![now],
            last_utility: None,
            pretty_description,
        }
    }

    pub fn is_resident(&self) -> bool {
        self.storage_key.is_some()
    }

    /// Appends an access timestamp, enforcing monotonicity and the
    /// capped history length.
    pub fn record_access(&mut self, at: DateTime<Utc>) {
        let at = match self.access_log.last() {
            Some(last) if *last > at => *last,
            _ => at,
        };
        self.access_log.push(at);
        if self.access_log.len() > MAX_ACCESS_LOG_LEN {
            let overflow = self.access_log.len() - MAX_ACCESS_LOG_LEN;
            self.access_log.drain(0..overflow);
        }
        self.last_utility = None;
    }

    /// Marks the item non-resident: storage_key cleared, size zeroed.
    /// `created_at`, `compute_cost`, and `access_log` are preserved.
    pub fn mark_non_resident(&mut self) {
        self.storage_key = None;
        self.size_bytes = 0;
        self.last_utility = None;
    }

    /// Clears access history entirely, per `prune_cache(remove_history=true)`.
    pub fn clear_access_log(&mut self) {
        self.access_log.clear();
        self.last_utility = None;
    }
}
