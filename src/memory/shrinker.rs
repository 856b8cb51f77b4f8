/*!
 * Shrinker Registry
 *
 * Auxiliary caches (inode, dentry, buffer-head caches and the like) are aged
 * in proportion to LRU scanning. Each registered cache accrues scan credit
 * every reclaim pass and is drained in fixed-size batches once the credit
 * crosses the batch threshold.
 *
 * ## Locking
 *
 * - The registry lock guards the entry list only and is never held while a
 *   callback runs, so different shrinkers may run concurrently
 * - Each entry has its own liveness lock, read-held for the duration of a
 *   callback; `unregister` write-locks it after removing the entry, which
 *   waits out any in-flight invocation
 *
 * A callback must not unregister its own shrinker.
 */

use super::traits::ShrinkableCache;
use super::types::Capabilities;
use crate::core::errors::{ReclaimError, ReclaimResult};
use crate::core::limits::SHRINK_BATCH;
use crate::core::types::PageCount;
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Opaque registration token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShrinkerHandle(u64);

impl ShrinkerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

struct ShrinkerEntry {
    handle: ShrinkerHandle,
    seeks: usize,
    cache: Arc<dyn ShrinkableCache>,
    /// Pending scan credit
    credit: AtomicUsize,
    alive: RwLock<bool>,
}

/// Outcome of one registry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShrinkStats {
    /// Objects handed to callbacks
    pub scanned: usize,
    /// Callbacks invoked with a non-zero scan count
    pub calls: usize,
    /// Shrinkers whose drain stopped early for lack of progress
    pub stalled: usize,
}

/// Registry of auxiliary-cache shrinkers
pub struct ShrinkerRegistry {
    entries: RwLock<Vec<Arc<ShrinkerEntry>>>,
    next_id: AtomicU64,
    batch: usize,
}

impl ShrinkerRegistry {
    pub fn new() -> Self {
        Self::with_batch(SHRINK_BATCH)
    }

    /// Registry draining credit in batches of `batch` objects
    pub fn with_batch(batch: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            batch: batch.max(1),
        }
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Register a cache; `seeks` weights how much scan credit it accrues
    pub fn register(
        &self,
        seeks: usize,
        cache: Arc<dyn ShrinkableCache>,
    ) -> ReclaimResult<ShrinkerHandle> {
        if seeks == 0 {
            return Err(ReclaimError::InvalidSeeks(seeks));
        }

        let handle = ShrinkerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(ShrinkerEntry {
            handle,
            seeks,
            cache,
            credit: AtomicUsize::new(0),
            alive: RwLock::new(true),
        });

        let mut entries = self.entries.write();
        entries
            .try_reserve(1)
            .map_err(|e| ReclaimError::ShrinkerRegistration(e.to_string()))?;
        entries.push(entry);

        info!("Shrinker {} registered (seeks={})", handle.0, seeks);
        Ok(handle)
    }

    /// Remove a shrinker. Blocks until an in-flight callback of this shrinker
    /// returns; after that the callback is never invoked again.
    pub fn unregister(&self, handle: ShrinkerHandle) -> bool {
        let entry = {
            let mut entries = self.entries.write();
            match entries.iter().position(|e| e.handle == handle) {
                Some(pos) => entries.remove(pos),
                None => return false,
            }
        };

        *entry.alive.write() = false;
        info!("Shrinker {} unregistered", handle.0);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Pending scan credit of a shrinker
    pub fn pending(&self, handle: ShrinkerHandle) -> Option<usize> {
        self.entries
            .read()
            .iter()
            .find(|e| e.handle == handle)
            .map(|e| e.credit.load(Ordering::Acquire))
    }

    /// Age every cache in proportion to `scanned` LRU pages out of `lru_pages`
    pub fn shrink_all(&self, scanned: PageCount, lru_pages: PageCount, caps: Capabilities) -> ShrinkStats {
        let snapshot: Vec<Arc<ShrinkerEntry>> = self.entries.read().clone();
        let mut stats = ShrinkStats::default();

        for entry in snapshot {
            let alive = entry.alive.read();
            if !*alive {
                continue;
            }
            self.shrink_one(&entry, scanned, lru_pages, caps, &mut stats);
        }

        if stats.calls > 0 {
            debug!(
                "Shrinkers scanned {} objects in {} calls ({} stalled)",
                stats.scanned, stats.calls, stats.stalled
            );
        }
        stats
    }

    fn shrink_one(
        &self,
        entry: &ShrinkerEntry,
        scanned: PageCount,
        lru_pages: PageCount,
        caps: Capabilities,
        stats: &mut ShrinkStats,
    ) {
        let objects = entry.cache.pressure(0, caps);
        let delta = (scanned as u128 * entry.seeks as u128 * objects as u128
            / (lru_pages as u128 + 1)) as usize;

        // Credit is claimed for the drain and whatever is left goes back
        let mut credit = entry.credit.swap(0, Ordering::AcqRel).saturating_add(delta);
        let mut remaining = objects;

        while credit >= self.batch {
            let left = entry.cache.pressure(self.batch, caps);
            stats.scanned += self.batch;
            stats.calls += 1;

            if left >= remaining {
                stats.stalled += 1;
                break;
            }
            credit -= self.batch;
            remaining = left;
            std::thread::yield_now();
        }

        let cap = 2 * objects.max(self.batch);
        entry.credit.fetch_add(credit.min(cap), Ordering::AcqRel);
    }
}

impl Default for ShrinkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShrinkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShrinkerRegistry")
            .field("shrinkers", &self.len())
            .field("batch", &self.batch)
            .finish()
    }
}
