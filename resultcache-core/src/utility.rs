//! The utility model: a pure function ranking items by desirability of
//! retention, plus the total order pruning walks in.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::config::CacheConfig;
use crate::types::CacheItem;

/// Bytes in one gigabyte, for the storage/compute exchange rate.
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Number of half-lives back from `now` that bound the access-rate
/// estimator's observation window.
const OBSERVATION_WINDOW_HALF_LIVES: f64 = 5.0;

/// Computes the expected-value-of-retention for `item` at `now`.
///
/// `utility = expected_savings_per_second − storage_cost_per_second`.
/// Pure and deterministic given its inputs; does not read or write
/// `item.last_utility` (callers decide whether to cache the result).
pub fn utility(item: &CacheItem, config: &CacheConfig, now: DateTime<Utc>) -> f64 {
    let storage_cost = storage_cost_per_second(item.size_bytes, config);
    let access_rate = access_rate_estimate(item, config, now);
    let expected_savings = access_rate * item.compute_cost.as_secs_f64();
    expected_savings - storage_cost
}

/// Storage opportunity cost, in compute-seconds-per-second, of holding
/// `size_bytes` resident.
fn storage_cost_per_second(size_bytes: u64, config: &CacheConfig) -> f64 {
    let gigabytes = size_bytes as f64 / GB;
    gigabytes / config.cost_of_minute_compute_rel_to_cost_of_1gb / 60.0
}

/// Weighted accesses per unit time, via exponential decay with
/// parameter `half_life_of_accesses`.
///
/// An item with no recorded accesses is treated as if it had exactly
/// one access at `created_at` — otherwise a freshly computed,
/// never-yet-read item would always rank as worthless.
fn access_rate_estimate(item: &CacheItem, config: &CacheConfig, now: DateTime<Utc>) -> f64 {
    let half_life_secs = config.half_life_of_accesses.as_secs_f64().max(f64::MIN_POSITIVE);

    let window_floor = now
        - chrono::Duration::milliseconds(
            (half_life_secs * OBSERVATION_WINDOW_HALF_LIVES * 1000.0) as i64,
        );
    let window_start = item.created_at.max(window_floor);
    let window_secs = (now - window_start).num_milliseconds() as f64 / 1000.0;

    let weighted_sum: f64 = if item.access_log.is_empty() {
        decay_weight(item.created_at, now, half_life_secs)
    } else {
        item.access_log
            .iter()
            .map(|t| decay_weight(*t, now, half_life_secs))
            .sum()
    };

    if window_secs <= 0.0 {
        weighted_sum
    } else {
        weighted_sum / window_secs
    }
}

fn decay_weight(t: DateTime<Utc>, now: DateTime<Utc>, half_life_secs: f64) -> f64 {
    let age_secs = (now - t).num_milliseconds() as f64 / 1000.0;
    2f64.powf(-(age_secs.max(0.0) / half_life_secs))
}

/// A candidate for eviction: an item together with its freshly
/// computed utility, ordered ascending (least valuable first) per the
/// tie-break rules in the utility model.
///
/// Tie-break order when utilities are exactly equal: larger
/// `size_bytes` first, then older `created_at` first, then
/// lexicographic `item_key`.
pub fn eviction_order(a: &CacheItem, a_utility: f64, b: &CacheItem, b_utility: f64) -> Ordering {
    a_utility
        .total_cmp(&b_utility)
        .then_with(|| b.size_bytes.cmp(&a.size_bytes))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.item_key.cmp(&b.item_key))
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::types::{ItemKey, StorageKey};
    use proptest::prelude::*;
    use std::time::Duration;

    fn fixed_item(seed: u64, size_bytes: u64, compute_cost_secs: u64, created_at: DateTime<Utc>) -> CacheItem {
        CacheItem::new_resident(
            ItemKey::from_bytes(&seed.to_le_bytes()),
            StorageKey::new("k"),
            size_bytes,
            Duration::from_secs(compute_cost_secs),
            created_at,
            "prop".to_string(),
        )
    }

    proptest! {
        /// Growing an item's size, all else held equal, never increases
        /// its utility — storage cost is monotonic in size.
        #[test]
        fn larger_size_never_increases_utility(
            small in 0u64..1_000_000_000,
            extra in 1u64..1_000_000_000,
            compute_cost_secs in 0u64..3600,
        ) {
            let now = Utc::now();
            let cfg = CacheConfig::default();
            let large = small.saturating_add(extra);
            let a = fixed_item(1, small, compute_cost_secs, now);
            let b = fixed_item(2, large, compute_cost_secs, now);
            prop_assert!(utility(&a, &cfg, now) >= utility(&b, &cfg, now));
        }

        /// A more recent single access, all else held equal, never
        /// decreases utility — the access-rate estimator decays with age.
        #[test]
        fn more_recent_single_access_never_decreases_utility(
            younger_age_secs in 0i64..5_000_000,
            extra_age_secs in 1i64..5_000_000,
            size_bytes in 0u64..1_000_000,
            compute_cost_secs in 1u64..3600,
        ) {
            let now = Utc::now();
            let cfg = CacheConfig::default();
            let created_at = now - chrono::Duration::days(365);
            let older_age_secs = younger_age_secs + extra_age_secs;

            let mut newer = fixed_item(1, size_bytes, compute_cost_secs, created_at);
            newer.access_log = vec![now - chrono::Duration::seconds(younger_age_secs)];
            let mut older = fixed_item(2, size_bytes, compute_cost_secs, created_at);
            older.access_log = vec![now - chrono::Duration::seconds(older_age_secs)];

            prop_assert!(utility(&newer, &cfg, now) >= utility(&older, &cfg, now));
        }

        /// `eviction_order` is antisymmetric: swapping the two operands
        /// reverses the reported ordering.
        #[test]
        fn eviction_order_is_antisymmetric(
            a_size in 0u64..1000,
            b_size in 0u64..1000,
            a_utility in -1000f64..1000f64,
            b_utility in -1000f64..1000f64,
        ) {
            let now = Utc::now();
            let a = fixed_item(1, a_size, 1, now);
            let b = fixed_item(2, b_size, 1, now);
            let forward = eviction_order(&a, a_utility, &b, b_utility);
            let backward = eviction_order(&b, b_utility, &a, a_utility);
            prop_assert_eq!(forward, backward.reverse());
        }
    }
}
