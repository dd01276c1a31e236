//! The pruning engine: reconciles the metadata store against the
//! object store and evicts items whose utility does not justify their
//! storage.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::traits::{MetadataStore, ObjectStore};
use crate::types::{CacheItem, ItemKey};
use crate::utility::{eviction_order, utility};

/// Outcome of one `prune` run, for logging and tests.
#[derive(Debug, Default, Clone)]
pub struct PruneReport {
    /// Items demoted to non-resident because their blob was missing,
    /// or whose recorded size was corrected.
    pub repaired: usize,
    /// Blobs deleted because no resident item claimed them.
    pub orphans_removed: usize,
    /// Items evicted, in eviction order.
    pub evicted: Vec<ItemKey>,
    /// Non-fatal failures encountered while evicting (blob deletion
    /// failures); the offending item was left resident.
    pub eviction_failures: Vec<String>,
}

/// Runs the full prune algorithm: repair, orphan sweep, ranking,
/// unconditional eviction, space-driven eviction, and (optionally)
/// history compaction.
///
/// Idempotent when free space already satisfies the reservation and
/// every item's utility is already at or above `min_utility_to_keep`.
pub async fn prune(
    metadata: &dyn MetadataStore,
    objects: &dyn ObjectStore,
    config: &CacheConfig,
    remove_history: bool,
    verbose: bool,
    now: DateTime<Utc>,
) -> CacheResult<PruneReport> {
    let mut report = PruneReport::default();

    let mut resident = repair(metadata, objects, verbose, &mut report).await?;
    sweep_orphans(objects, &resident, &mut report).await?;

    let mut ranked: Vec<(CacheItem, f64)> = resident
        .drain(..)
        .map(|item| {
            let u = utility(&item, config, now);
            (item, u)
        })
        .collect();

    evict_unconditionally(metadata, objects, config, &mut ranked, verbose, &mut report).await?;
    evict_for_space(metadata, objects, config, &mut ranked, verbose, &mut report).await?;

    if remove_history {
        metadata.clear_access_logs().await?;
        debug!("prune: cleared access logs for all items");
    }

    info!(
        repaired = report.repaired,
        orphans_removed = report.orphans_removed,
        evicted = report.evicted.len(),
        eviction_failures = report.eviction_failures.len(),
        "prune finished"
    );

    Ok(report)
}

/// Repair pass: verifies each resident item's blob exists and its
/// recorded size matches, fixing up both the in-memory snapshot and
/// the metadata store. Returns the (possibly repaired) resident set.
async fn repair(
    metadata: &dyn MetadataStore,
    objects: &dyn ObjectStore,
    verbose: bool,
    report: &mut PruneReport,
) -> CacheResult<Vec<CacheItem>> {
    let mut resident = metadata.iter_resident().await?;

    for item in resident.iter_mut() {
        let storage_key = match &item.storage_key {
            Some(sk) => sk.clone(),
            None => continue,
        };

        if !objects.exists(&storage_key).await? {
            if verbose {
                warn!(item = %item.item_key, storage_key = %storage_key, "resident item missing its blob, marking non-resident");
            }
            metadata.mark_non_resident(&item.item_key).await?;
            item.mark_non_resident();
            report.repaired += 1;
            continue;
        }

        if let Some(actual_size) = objects.size(&storage_key).await? {
            if actual_size != item.size_bytes {
                item.size_bytes = actual_size;
                item.last_utility = None;
                metadata.upsert(item.clone()).await?;
                report.repaired += 1;
            }
        } else if verbose {
            warn!(item = %item.item_key, storage_key = %storage_key, "object store reports the blob exists but has no size");
        }
    }

    Ok(resident)
}

/// Deletes every blob in the object store that no resident item
/// claims.
async fn sweep_orphans(
    objects: &dyn ObjectStore,
    resident: &[CacheItem],
    report: &mut PruneReport,
) -> CacheResult<()> {
    let claimed: HashSet<_> = resident
        .iter()
        .filter_map(|item| item.storage_key.clone())
        .collect();

    for key in objects.iter_keys().await? {
        if !claimed.contains(&key) {
            objects.delete(&key).await?;
            report.orphans_removed += 1;
            debug!(storage_key = %key, "removed orphan blob with no claiming item");
        }
    }

    Ok(())
}

async fn evict_unconditionally(
    metadata: &dyn MetadataStore,
    objects: &dyn ObjectStore,
    config: &CacheConfig,
    ranked: &mut Vec<(CacheItem, f64)>,
    verbose: bool,
    report: &mut PruneReport,
) -> CacheResult<()> {
    let mut remaining = Vec::with_capacity(ranked.len());
    for (item, u) in ranked.drain(..) {
        if u < config.min_utility_to_keep {
            evict_one(metadata, objects, &item, verbose, report).await?;
        } else {
            remaining.push((item, u));
        }
    }
    *ranked = remaining;
    Ok(())
}

async fn evict_for_space(
    metadata: &dyn MetadataStore,
    objects: &dyn ObjectStore,
    config: &CacheConfig,
    ranked: &mut Vec<(CacheItem, f64)>,
    verbose: bool,
    report: &mut PruneReport,
) -> CacheResult<()> {
    loop {
        if objects.free_space().await? >= config.reserved_free_space {
            return Ok(());
        }

        // Zero-size items never help satisfy a space reservation, so
        // they are not candidates for this pass even if they rank
        // worst overall; they can still be reclaimed by the
        // unconditional threshold pass.
        let worst_idx = ranked
            .iter()
            .enumerate()
            .filter(|(_, (item, _))| item.size_bytes > 0)
            .min_by(|(_, (a, au)), (_, (b, bu))| eviction_order(a, *au, b, *bu))
            .map(|(idx, _)| idx);

        let Some(worst_idx) = worst_idx else {
            return Ok(());
        };

        let (item, _) = ranked.remove(worst_idx);
        evict_one(metadata, objects, &item, verbose, report).await?;
    }
}

/// Evicts a single item: deletes its blob first, then demotes its
/// metadata. A blob-deletion failure is non-fatal — the item stays
/// resident and the caller's prune run continues with the next
/// candidate.
async fn evict_one(
    metadata: &dyn MetadataStore,
    objects: &dyn ObjectStore,
    item: &CacheItem,
    verbose: bool,
    report: &mut PruneReport,
) -> CacheResult<()> {
    let Some(storage_key) = &item.storage_key else {
        return Ok(());
    };

    match objects.delete(storage_key).await {
        Ok(()) => {
            metadata.mark_non_resident(&item.item_key).await?;
            report.evicted.push(item.item_key);
            Ok(())
        }
        Err(err) => {
            let msg = format!(
                "failed to delete blob for item {} at {}: {}",
                item.item_key, storage_key, err
            );
            if verbose {
                warn!("{}", msg);
            }
            report.eviction_failures.push(msg);
            Ok(())
        }
    }
}
