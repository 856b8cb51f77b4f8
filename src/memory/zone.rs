/*!
 * Zone
 *
 * A contiguous range of page frames with its own LRU lists, free-page count,
 * watermarks and scan bookkeeping. The frame table is allocated once at node
 * init and lives for the lifetime of the system; LRU lists index into it.
 *
 * ## Locking
 *
 * One `parking_lot::Mutex` per zone covers list surgery and the parked
 * writeback count. It is held for O(batch) pointer work only: page evaluation,
 * I/O submission, allocator callbacks and shrinkers all run with it released.
 * Scan counters and the free count are atomics read without the lock.
 */

use super::lru::{LruList, LruLists, Membership, PageVec};
use super::page::{Page, PageFlags};
use super::traits::PageAllocator;
use super::types::Watermarks;
use crate::core::types::{PageCount, Pfn, ZoneRef};
use log::{info, trace, warn};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Static description of a zone, supplied at node init
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub name: String,
    pub start_pfn: Pfn,
    pub present_pages: PageCount,
    pub watermarks: Watermarks,
}

impl ZoneSpec {
    /// Zone with watermarks derived from `present_pages / 32` as `min`
    pub fn new(name: impl Into<String>, start_pfn: Pfn, present_pages: PageCount) -> Self {
        Self {
            name: name.into(),
            start_pfn,
            present_pages,
            watermarks: Watermarks::from_min((present_pages / 32).max(1)),
        }
    }

    pub fn with_watermarks(mut self, watermarks: Watermarks) -> Self {
        self.watermarks = watermarks;
        self
    }
}

/// Per-list page counts as seen by [`Zone::check_lru`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LruCounts {
    pub active: PageCount,
    pub inactive: PageCount,
    pub isolated: PageCount,
    pub writeback: PageCount,
}

impl LruCounts {
    /// Pages owned by reclaim in any state
    pub fn resident(&self) -> PageCount {
        self.active + self.inactive + self.isolated + self.writeback
    }
}

/// State guarded by the zone lock
#[derive(Debug)]
pub struct ZoneLru {
    lists: LruLists,
    nr_writeback: PageCount,
}

/// Memory zone
///
/// # Performance
/// - Cache-line aligned so the scan counters of neighbouring zones do not
///   share a line
#[repr(C, align(64))]
pub struct Zone {
    id: ZoneRef,
    name: String,
    start_pfn: Pfn,
    watermarks: Watermarks,
    frames: Box<[Arc<Page>]>,
    lru: Mutex<ZoneLru>,
    free_frames: Mutex<Vec<u32>>,
    free_pages: AtomicUsize,
    /// Frames with a nonzero mapcount, maintained by the frames themselves
    nr_mapped: Arc<AtomicUsize>,
    /// Monotonic count of pages taken off either list
    pages_scanned: AtomicU64,
    /// Pages scanned since the zone last freed anything
    scanned_since_reclaim: AtomicU64,
    refill_counter: AtomicUsize,
    all_unreclaimable: AtomicBool,
}

impl Zone {
    pub fn new(id: ZoneRef, spec: ZoneSpec) -> Arc<Self> {
        let present = spec.present_pages;
        let nr_mapped = Arc::new(AtomicUsize::new(0));
        let frames: Box<[Arc<Page>]> = (0..present as u64)
            .map(|offset| {
                Arc::new(Page::with_mapped_counter(
                    spec.start_pfn + offset,
                    id,
                    Arc::clone(&nr_mapped),
                ))
            })
            .collect();
        // Lowest frames are handed out first
        let free_frames: Vec<u32> = (0..present as u32).rev().collect();

        if !spec.watermarks.is_ordered() {
            warn!(
                "Zone {} ({}) has unordered watermarks {:?}",
                id, spec.name, spec.watermarks
            );
        }
        info!(
            "Zone {} ({}) initialized: {} pages at pfn {:#x}, watermarks min={} low={} high={}",
            id,
            spec.name,
            present,
            spec.start_pfn,
            spec.watermarks.min,
            spec.watermarks.low,
            spec.watermarks.high
        );

        Arc::new(Self {
            id,
            name: spec.name,
            start_pfn: spec.start_pfn,
            watermarks: spec.watermarks,
            frames,
            lru: Mutex::new(ZoneLru {
                lists: LruLists::new(present),
                nr_writeback: 0,
            }),
            free_frames: Mutex::new(free_frames),
            free_pages: AtomicUsize::new(present),
            nr_mapped,
            pages_scanned: AtomicU64::new(0),
            scanned_since_reclaim: AtomicU64::new(0),
            refill_counter: AtomicUsize::new(0),
            all_unreclaimable: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> ZoneRef {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn watermarks(&self) -> Watermarks {
        self.watermarks
    }

    pub fn present_pages(&self) -> PageCount {
        self.frames.len()
    }

    /// Page descriptor for a frame of this zone
    pub fn page(&self, pfn: Pfn) -> Option<&Arc<Page>> {
        let offset = pfn.checked_sub(self.start_pfn)?;
        self.frames.get(usize::try_from(offset).ok()?)
    }

    pub fn contains(&self, page: &Page) -> bool {
        page.zone() == self.id && self.page(page.pfn()).is_some()
    }

    #[inline]
    fn index_of(&self, page: &Page) -> usize {
        assert_eq!(
            page.zone(),
            self.id,
            "page {:#x} belongs to {}, not {}",
            page.pfn(),
            page.zone(),
            self.id
        );
        (page.pfn() - self.start_pfn) as usize
    }

    // ------------------------------------------------------------------
    // Free pages
    // ------------------------------------------------------------------

    #[inline]
    pub fn free_pages(&self) -> PageCount {
        self.free_pages.load(Ordering::Acquire)
    }

    /// Pages currently handed out by the allocator
    pub fn used_pages(&self) -> PageCount {
        self.present_pages() - self.free_pages()
    }

    /// At or below the low watermark: the balancing daemon should run
    pub fn is_low(&self) -> bool {
        self.free_pages() <= self.watermarks.low
    }

    /// At or above the high watermark
    pub fn is_balanced(&self) -> bool {
        self.free_pages() >= self.watermarks.high
    }

    /// Pages needed to reach the high watermark
    pub fn balance_deficit(&self) -> PageCount {
        self.watermarks.high.saturating_sub(self.free_pages())
    }

    /// Take a free frame; it is not on any list until handed to reclaim
    pub fn alloc_page(&self) -> Option<Arc<Page>> {
        let idx = {
            let mut free = self.free_frames.lock();
            let idx = free.pop()?;
            self.free_pages.fetch_sub(1, Ordering::AcqRel);
            idx as usize
        };
        Some(Arc::clone(&self.frames[idx]))
    }

    /// Return frames freed by reclaim to the zone and notify the allocator.
    /// Must be called without the LRU lock held.
    pub(crate) fn free_batch(&self, pages: &mut PageVec, allocator: &dyn PageAllocator) {
        if pages.is_empty() {
            return;
        }
        {
            let mut free = self.free_frames.lock();
            for page in pages.iter() {
                page.reset();
                free.push(self.index_of(page) as u32);
            }
            self.free_pages.fetch_add(pages.len(), Ordering::AcqRel);
        }
        for page in pages.drain() {
            allocator.free_page(self, &page);
        }
    }

    // ------------------------------------------------------------------
    // LRU
    // ------------------------------------------------------------------

    /// Acquire the zone lock for list surgery
    pub fn lock_lru(&self) -> ZoneLruGuard<'_> {
        ZoneLruGuard {
            zone: self,
            inner: self.lru.lock(),
        }
    }

    /// Non-blocking variant of [`Zone::lock_lru`]
    pub fn try_lock_lru(&self) -> Option<ZoneLruGuard<'_>> {
        self.lru.try_lock().map(|inner| ZoneLruGuard { zone: self, inner })
    }

    pub fn nr_active(&self) -> PageCount {
        self.lru.lock().lists.len(LruList::Active)
    }

    pub fn nr_inactive(&self) -> PageCount {
        self.lru.lock().lists.len(LruList::Inactive)
    }

    /// Active plus inactive
    pub fn nr_lru_pages(&self) -> PageCount {
        let lru = self.lru.lock();
        lru.lists.len(LruList::Active) + lru.lists.len(LruList::Inactive)
    }

    /// Pages parked off both lists until writeback completes
    pub fn nr_writeback(&self) -> PageCount {
        self.lru.lock().nr_writeback
    }

    /// Frames with at least one page-table mapping
    pub fn nr_mapped(&self) -> PageCount {
        self.nr_mapped.load(Ordering::Acquire)
    }

    /// Hand a new page to reclaim on the inactive list
    pub fn add_to_inactive(&self, page: &Arc<Page>) {
        self.lock_lru().insert(LruList::Inactive, page);
    }

    /// Hand a new page to reclaim on the active list
    pub fn add_to_active(&self, page: &Arc<Page>) {
        self.lock_lru().insert(LruList::Active, page);
    }

    /// Insert a batch of new pages under one lock acquisition
    pub fn add_pagevec(&self, list: LruList, pages: &mut PageVec) {
        if pages.is_empty() {
            return;
        }
        let mut lru = self.lock_lru();
        for page in pages.drain() {
            lru.insert(list, &page);
        }
    }

    /// Take a page away from reclaim (truncate, munlock, migration)
    pub fn remove_from_lru(&self, page: &Arc<Page>) -> bool {
        self.lock_lru().remove(page).is_some()
    }

    /// Access path: the first touch marks an inactive page referenced, the
    /// second moves it to the active list. Returns whether the page was promoted.
    pub fn mark_page_accessed(&self, page: &Arc<Page>) -> bool {
        if !page.is_active() && page.is_referenced() && page.on_lru() {
            if self.activate_page(page) {
                page.clear(PageFlags::REFERENCED);
                return true;
            }
        } else if !page.is_referenced() {
            page.mark_referenced();
        }
        false
    }

    /// Move an inactive listed page to the head of the active list
    pub fn activate_page(&self, page: &Arc<Page>) -> bool {
        let mut lru = self.lock_lru();
        let idx = self.index_of(page);
        if lru.inner.lists.membership(idx) != Membership::Listed(LruList::Inactive) {
            return false;
        }
        lru.inner.lists.unlink(idx);
        page.set(PageFlags::ACTIVE);
        lru.inner.lists.push_head(LruList::Active, idx);
        true
    }

    // ------------------------------------------------------------------
    // Scan bookkeeping
    // ------------------------------------------------------------------

    /// Pages taken off either list since boot
    pub fn pages_scanned(&self) -> u64 {
        self.pages_scanned.load(Ordering::Relaxed)
    }

    /// Pages taken off either list since the zone last freed a page
    pub fn scanned_since_reclaim(&self) -> u64 {
        self.scanned_since_reclaim.load(Ordering::Relaxed)
    }

    pub(crate) fn note_reclaimed(&self, freed: PageCount) {
        if freed > 0 {
            self.scanned_since_reclaim.store(0, Ordering::Relaxed);
        }
    }

    /// Add the refill quota of one shrink pass; returns the accumulated value
    pub(crate) fn add_refill(&self, quota: PageCount) -> PageCount {
        self.refill_counter.fetch_add(quota, Ordering::AcqRel) + quota
    }

    pub(crate) fn take_refill(&self) -> PageCount {
        self.refill_counter.swap(0, Ordering::AcqRel)
    }

    pub fn refill_counter(&self) -> PageCount {
        self.refill_counter.load(Ordering::Acquire)
    }

    pub fn all_unreclaimable(&self) -> bool {
        self.all_unreclaimable.load(Ordering::Acquire)
    }

    /// Flag the zone as not worth scanning; returns `true` on the first marking
    pub(crate) fn mark_unreclaimable(&self) -> bool {
        let newly = !self.all_unreclaimable.swap(true, Ordering::AcqRel);
        if newly {
            warn!(
                "Zone {} ({}) marked all_unreclaimable after {} fruitless scans",
                self.id,
                self.name,
                self.scanned_since_reclaim()
            );
        }
        newly
    }

    /// Walk both lists and every frame, checking that page flags agree with
    /// list membership and that the counts add up
    pub fn check_lru(&self) -> Result<LruCounts, String> {
        let lru = self.lru.lock();
        lru.lists.verify()?;

        let mut counts = LruCounts::default();
        for (idx, page) in self.frames.iter().enumerate() {
            let membership = lru.lists.membership(idx);
            match membership {
                Membership::Off => {
                    if page.on_lru() {
                        return Err(format!("page {:#x} is off-list but flagged LRU", page.pfn()));
                    }
                }
                Membership::Listed(list) => {
                    if !page.on_lru() {
                        return Err(format!("page {:#x} is listed without LRU flag", page.pfn()));
                    }
                    if page.is_active() != (list == LruList::Active) {
                        return Err(format!(
                            "page {:#x} on {:?} list has ACTIVE={}",
                            page.pfn(),
                            list,
                            page.is_active()
                        ));
                    }
                    match list {
                        LruList::Active => counts.active += 1,
                        LruList::Inactive => counts.inactive += 1,
                    }
                }
                Membership::Isolated => {
                    if !page.on_lru() {
                        return Err(format!("isolated page {:#x} lost its LRU flag", page.pfn()));
                    }
                    counts.isolated += 1;
                }
                Membership::Writeback => counts.writeback += 1,
            }
        }

        if counts.writeback != lru.nr_writeback {
            return Err(format!(
                "{} pages parked for writeback but counter says {}",
                counts.writeback, lru.nr_writeback
            ));
        }
        if counts.resident() > self.used_pages() {
            return Err(format!(
                "{} pages owned by reclaim but only {} frames in use",
                counts.resident(),
                self.used_pages()
            ));
        }
        Ok(counts)
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("present", &self.present_pages())
            .field("free", &self.free_pages())
            .field("watermarks", &self.watermarks)
            .field("all_unreclaimable", &self.all_unreclaimable())
            .finish()
    }
}

/// Zone lock held for list surgery
///
/// Keeps page flags in step with list membership: `LRU` is set for listed,
/// isolated and parked pages; `ACTIVE` exactly for pages on the active list.
pub struct ZoneLruGuard<'a> {
    zone: &'a Zone,
    inner: MutexGuard<'a, ZoneLru>,
}

impl ZoneLruGuard<'_> {
    pub fn len(&self, list: LruList) -> PageCount {
        self.inner.lists.len(list)
    }

    pub fn membership(&self, page: &Page) -> Membership {
        self.inner.lists.membership(self.zone.index_of(page))
    }

    /// Link a page that reclaim does not own yet at the head of `list`
    pub fn insert(&mut self, list: LruList, page: &Arc<Page>) {
        let idx = self.zone.index_of(page);
        assert_eq!(
            self.inner.lists.membership(idx),
            Membership::Off,
            "page {:#x} handed to reclaim twice",
            page.pfn()
        );
        page.set(PageFlags::LRU);
        self.link(list, idx, page, false);
    }

    /// Unlink a page from whichever list holds it and give it up
    pub fn remove(&mut self, page: &Arc<Page>) -> Option<LruList> {
        let idx = self.zone.index_of(page);
        let list = self.inner.lists.unlink(idx)?;
        page.clear(PageFlags::LRU | PageFlags::ACTIVE);
        Some(list)
    }

    /// Detach up to `n` pages from the tail of `list` into a private batch.
    /// The pages keep their LRU flag.
    pub fn take_batch(&mut self, list: LruList, n: PageCount) -> Vec<Arc<Page>> {
        let taken = self.inner.lists.isolate_tail(list, n);
        let count = taken.len() as u64;
        if count > 0 {
            self.zone.pages_scanned.fetch_add(count, Ordering::Relaxed);
            self.zone
                .scanned_since_reclaim
                .fetch_add(count, Ordering::Relaxed);
        }
        taken
            .into_iter()
            .map(|idx| Arc::clone(&self.zone.frames[idx]))
            .collect()
    }

    /// Return an isolated page to the head of `list`
    pub fn putback(&mut self, list: LruList, page: &Arc<Page>) {
        let idx = self.isolated_index(page);
        self.link(list, idx, page, false);
    }

    /// Park an isolated page whose writeback was started. If the I/O already
    /// completed the page goes straight to the reclaim end of the inactive list
    /// and `false` is returned.
    pub fn park_writeback(&mut self, page: &Arc<Page>) -> bool {
        let idx = self.isolated_index(page);
        if page.is_writeback() {
            self.inner.lists.set_membership(idx, Membership::Writeback);
            self.inner.nr_writeback += 1;
            true
        } else {
            page.clear(PageFlags::RECLAIM);
            self.link(LruList::Inactive, idx, page, true);
            false
        }
    }

    /// Writeback completion: clear the flag and, if the page was parked,
    /// requeue it on the inactive list. Returns the list end it went to
    /// (`true` = tail) or `None` if the page was not parked.
    pub fn complete_writeback(&mut self, page: &Arc<Page>) -> Option<bool> {
        page.clear(PageFlags::WRITEBACK);
        let idx = self.zone.index_of(page);
        if self.inner.lists.membership(idx) != Membership::Writeback {
            return None;
        }
        self.inner.nr_writeback = self
            .inner
            .nr_writeback
            .checked_sub(1)
            .unwrap_or_else(|| panic!("zone {} writeback count underflow", self.zone.id));
        self.inner.lists.set_membership(idx, Membership::Off);

        let rotate = page.test_and_clear(PageFlags::RECLAIM);
        self.link(LruList::Inactive, idx, page, rotate);
        Some(rotate)
    }

    /// Give up an isolated page that reclaim freed
    pub fn release(&mut self, page: &Arc<Page>) {
        let idx = self.isolated_index(page);
        self.inner.lists.set_membership(idx, Membership::Off);
        page.clear(PageFlags::LRU | PageFlags::ACTIVE);
    }

    fn isolated_index(&self, page: &Page) -> usize {
        let idx = self.zone.index_of(page);
        assert_eq!(
            self.inner.lists.membership(idx),
            Membership::Isolated,
            "page {:#x} is not in a scan batch",
            page.pfn()
        );
        idx
    }

    fn link(&mut self, list: LruList, idx: usize, page: &Page, at_tail: bool) {
        match list {
            LruList::Active => page.set(PageFlags::ACTIVE),
            LruList::Inactive => page.clear(PageFlags::ACTIVE),
        }
        if at_tail {
            self.inner.lists.push_tail(list, idx);
        } else {
            self.inner.lists.push_head(list, idx);
        }
    }
}

impl Drop for ZoneLruGuard<'_> {
    fn drop(&mut self) {
        #[cfg(feature = "debug_lru")]
        if let Err(err) = self.inner.lists.verify() {
            panic!("zone {} LRU corrupted: {}", self.zone.id, err);
        }
        trace!(
            "zone {} unlocked: active={} inactive={} writeback={}",
            self.zone.id,
            self.inner.lists.len(LruList::Active),
            self.inner.lists.len(LruList::Inactive),
            self.inner.nr_writeback
        );
    }
}
