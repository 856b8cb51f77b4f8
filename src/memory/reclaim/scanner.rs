/*!
 * Zone Scanner
 *
 * Shrinks a zone's inactive list and refills it from the active list.
 *
 * Each round takes at most one cluster of pages off a list tail under the
 * zone lock, works on them with the lock dropped, then relocks once to put
 * the survivors back. Freed frames are handed to the allocator only after the
 * lock is released.
 */

use super::Reclaimer;
use crate::core::limits::SWAP_TENDENCY_THRESHOLD;
use crate::core::types::PageCount;
use crate::memory::lru::{LruList, PageVec};
use crate::memory::page::{Page, PageFlags};
use crate::memory::types::{ReclaimMode, ScanControl};
use crate::memory::zone::Zone;
use crate::monitoring::VmEvents;
use std::sync::Arc;

/// Pages to move from the active list for a pass of `nr_pages`: keeps the
/// active list at about two thirds of the zone's cache. `+1` guarantees
/// forward progress on a zone with an empty active list.
#[inline]
pub fn refill_quota(nr_pages: PageCount, nr_active: PageCount, nr_inactive: PageCount) -> PageCount {
    nr_pages * nr_active / ((nr_inactive | 1) * 2) + 1
}

impl Reclaimer {
    /// One scan pass over a zone: active-list aging bookkeeping, then
    /// inactive-list shrinking. Returns pages freed.
    pub fn shrink_zone(&self, zone: &Zone, max_scan: PageCount, sc: &mut ScanControl) -> PageCount {
        let cluster = self.config.swap_cluster_max;
        let quota = {
            let lru = zone.lock_lru();
            refill_quota(cluster, lru.len(LruList::Active), lru.len(LruList::Inactive))
        };

        if zone.add_refill(quota) > cluster {
            let count = zone.take_refill().min(self.config.refill_cap());
            self.refill_inactive_zone(zone, count, sc);
        }

        self.shrink_cache(zone, max_scan, sc)
    }

    /// Age up to `nr_pages` from the tail of the active list with a second-chance
    /// clock. Returns the number of pages demoted.
    pub fn refill_inactive_zone(&self, zone: &Zone, nr_pages: PageCount, sc: &ScanControl) -> PageCount {
        let batch = zone.lock_lru().take_batch(LruList::Active, nr_pages);
        if batch.is_empty() {
            return 0;
        }
        VmEvents::add(&self.events.pgrefill, batch.len());

        let distress = sc.priority.distress();
        let mapped_ratio = (zone.nr_mapped() * 100 / zone.present_pages().max(1)) as u32;
        let swap_tendency = mapped_ratio / 2 + distress + self.config.swappiness;
        let reclaim_mapped = swap_tendency >= SWAP_TENDENCY_THRESHOLD;
        let no_swap = self.swap.total_swap_pages() == 0;

        let mut stay: Vec<Arc<Page>> = Vec::with_capacity(batch.len());
        let mut demote: Vec<Arc<Page>> = Vec::with_capacity(batch.len());
        for page in batch {
            if page.is_mapped() && (!reclaim_mapped || self.rmap.page_referenced(&page)) {
                stay.push(page);
            } else if page.is_anon() && no_swap {
                stay.push(page);
            } else {
                page.clear(PageFlags::REFERENCED);
                demote.push(page);
            }
        }

        {
            let mut lru = zone.lock_lru();
            for page in &stay {
                lru.putback(LruList::Active, page);
            }
            for page in &demote {
                lru.putback(LruList::Inactive, page);
            }
        }

        VmEvents::add(&self.events.pgdeactivate, demote.len());
        tracing::trace!(
            zone = %zone.id(),
            swap_tendency,
            reclaim_mapped,
            kept = stay.len(),
            demoted = demote.len(),
            "refilled inactive list"
        );
        demote.len()
    }

    /// Scan at most `max_scan` pages from the inactive tail, stopping early
    /// once the scan control's target is met. Returns pages freed.
    pub fn shrink_cache(&self, zone: &Zone, max_scan: PageCount, sc: &mut ScanControl) -> PageCount {
        let cluster = self.config.swap_cluster_max;
        let scan_counter = match sc.mode {
            ReclaimMode::Direct => &self.events.pgscan_direct,
            ReclaimMode::Background => &self.events.pgscan_kswapd,
        };

        let mut scanned: PageCount = 0;
        let mut reclaimed: PageCount = 0;

        while scanned < max_scan && !sc.satisfied() {
            let batch = zone
                .lock_lru()
                .take_batch(LruList::Inactive, (max_scan - scanned).min(cluster));
            if batch.is_empty() {
                break;
            }

            let taken = batch.len();
            scanned += taken;
            sc.nr_scanned += taken;
            VmEvents::add(scan_counter, taken);

            let verdicts = self.shrink_list(batch, sc);

            let mut freed = PageVec::new();
            let mut lru = zone.lock_lru();
            for page in &verdicts.keep {
                lru.putback(LruList::Inactive, page);
            }
            for page in &verdicts.activate {
                lru.putback(LruList::Active, page);
            }
            for page in &verdicts.deferred {
                if !lru.park_writeback(page) {
                    VmEvents::add(&self.events.pgrotated, 1);
                }
            }
            let mut nr_freed = 0;
            for page in verdicts.free {
                lru.release(&page);
                nr_freed += 1;
                if freed.push(page) {
                    drop(lru);
                    zone.free_batch(&mut freed, self.allocator.as_ref());
                    lru = zone.lock_lru();
                }
            }
            drop(lru);
            zone.free_batch(&mut freed, self.allocator.as_ref());

            zone.note_reclaimed(nr_freed);
            self.events.record_steal(zone.id(), nr_freed);
            sc.nr_reclaimed += nr_freed;
            reclaimed += nr_freed;

            tracing::trace!(
                zone = %zone.id(),
                taken,
                freed = nr_freed,
                kept = verdicts.keep.len(),
                activated = verdicts.activate.len(),
                deferred = verdicts.deferred.len(),
                "inactive batch"
            );
        }

        tracing::debug!(zone = %zone.id(), priority = %sc.priority, scanned, reclaimed, "shrink_cache");
        reclaimed
    }
}
