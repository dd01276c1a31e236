//! Reference storage-key generator.

use crate::traits::StorageKeyGenerator;
use crate::types::{ItemKey, StorageKey};

/// Derives storage keys by concatenating a configurable prefix, the
/// hex of the item key, and an extension — deterministic and
/// bijective with the item key.
#[derive(Debug, Clone)]
pub struct PrefixedHexKeyGenerator {
    prefix: String,
    extension: String,
}

impl PrefixedHexKeyGenerator {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        PrefixedHexKeyGenerator {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }
}

impl Default for PrefixedHexKeyGenerator {
    fn default() -> Self {
        PrefixedHexKeyGenerator::new("items/", ".blob")
    }
}

impl StorageKeyGenerator for PrefixedHexKeyGenerator {
    fn derive(&self, item_key: &ItemKey) -> StorageKey {
        StorageKey::new(format!("{}{}{}", self.prefix, item_key.to_hex(), self.extension))
    }
}
