//! Cache-wide configuration: the knobs the utility model and pruning
//! engine read on every call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Configuration governing retention policy and the utility/storage
/// exchange rate.
///
/// Loaded once per coordinator construction via
/// `MetadataStore::load_config`, and persisted back with
/// `store_config` when the caller changes it. Config changes never
/// retroactively alter the recorded cost of already-stored items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minimum free bytes the object store's backing volume must
    /// retain after a prune.
    pub reserved_free_space: u64,

    /// Exchange rate between one minute of compute time and one
    /// gigabyte of storage-seconds. Higher values make the cache more
    /// willing to spend storage to avoid recomputation.
    pub cost_of_minute_compute_rel_to_cost_of_1gb: f64,

    /// Time window over which past-access evidence decays in the
    /// access-rate estimator.
    #[serde(with = "crate::types::duration_secs")]
    pub half_life_of_accesses: Duration,

    /// Items with utility strictly below this threshold are evicted
    /// unconditionally during prune.
    pub min_utility_to_keep: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            reserved_free_space: 0,
            cost_of_minute_compute_rel_to_cost_of_1gb: 60.0,
            half_life_of_accesses: Duration::from_secs(30 * 24 * 60 * 60),
            min_utility_to_keep: 0.0,
        }
    }
}

impl CacheConfig {
    /// Rejects configurations that would make the utility model
    /// undefined or meaningless (non-positive exchange rate or
    /// half-life).
    pub fn validate(&self) -> Result<(), CacheError> {
        if !self.cost_of_minute_compute_rel_to_cost_of_1gb.is_finite()
            || self.cost_of_minute_compute_rel_to_cost_of_1gb <= 0.0
        {
            return Err(CacheError::ConfigError(format!(
                "cost_of_minute_compute_rel_to_cost_of_1gb must be positive, got {}",
                self.cost_of_minute_compute_rel_to_cost_of_1gb
            )));
        }
        if self.half_life_of_accesses.is_zero() {
            return Err(CacheError::ConfigError(
                "half_life_of_accesses must be positive".to_string(),
            ));
        }
        if !self.min_utility_to_keep.is_finite() {
            return Err(CacheError::ConfigError(
                "min_utility_to_keep must be a finite number".to_string(),
            ));
        }
        Ok(())
    }
}
