/*!
 * Page Descriptor
 *
 * Metadata for one cache-resident page frame. Every field is atomic or
 * behind its own short lock so that lockless observers (reference checks,
 * writeback completion, the access path) never need the zone lock.
 */

use super::traits::PageOwner;
use crate::core::types::{Pfn, ZoneRef};
use bitflags::bitflags;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

bitflags! {
    /// Page state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// Held exclusively by some path (reclaim, I/O setup, truncate)
        const LOCKED = 1 << 0;
        /// Accessed since the last reference check
        const REFERENCED = 1 << 1;
        /// Contents newer than the backing store
        const DIRTY = 1 << 2;
        /// Writeback in flight
        const WRITEBACK = 1 << 3;
        /// On (or belongs on) the active list
        const ACTIVE = 1 << 4;
        /// Owned by the LRU (listed or in a private scan batch)
        const LRU = 1 << 5;
        /// Carries detachable private metadata (buffers)
        const PRIVATE = 1 << 6;
        /// Anonymous memory, no file owner
        const ANON = 1 << 7;
        /// Anonymous page with a swap slot
        const SWAPCACHE = 1 << 8;
        /// Written back for reclaim; rotate on completion
        const RECLAIM = 1 << 9;
    }
}

/// Page descriptor
pub struct Page {
    pfn: Pfn,
    zone: ZoneRef,
    flags: AtomicU32,
    /// Extra holders besides the LRU and the owning cache
    count: AtomicU32,
    /// Live page-table mappings
    mapcount: AtomicU32,
    /// Mapped-frame tally shared with the other frames of the zone
    nr_mapped: Arc<AtomicUsize>,
    owner: Mutex<Option<Arc<dyn PageOwner>>>,
}

impl Page {
    pub fn new(pfn: Pfn, zone: ZoneRef) -> Self {
        Self::with_mapped_counter(pfn, zone, Arc::new(AtomicUsize::new(0)))
    }

    /// Frame whose 0 -> 1 and 1 -> 0 mapcount transitions update `nr_mapped`
    pub(crate) fn with_mapped_counter(
        pfn: Pfn,
        zone: ZoneRef,
        nr_mapped: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            pfn,
            zone,
            flags: AtomicU32::new(0),
            count: AtomicU32::new(0),
            mapcount: AtomicU32::new(0),
            nr_mapped,
            owner: Mutex::new(None),
        }
    }

    #[inline]
    pub fn pfn(&self) -> Pfn {
        self.pfn
    }

    #[inline]
    pub fn zone(&self) -> ZoneRef {
        self.zone
    }

    // ------------------------------------------------------------------
    // Flag word
    // ------------------------------------------------------------------

    #[inline]
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn test(&self, flag: PageFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline]
    pub fn set(&self, flag: PageFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    #[inline]
    pub fn clear(&self, flag: PageFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    /// Set `flag`, returning whether it was already set
    #[inline]
    pub fn test_and_set(&self, flag: PageFlags) -> bool {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel) & flag.bits() != 0
    }

    /// Clear `flag`, returning whether it was set
    #[inline]
    pub fn test_and_clear(&self, flag: PageFlags) -> bool {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel) & flag.bits() != 0
    }

    /// Take the page lock without blocking
    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.test_and_set(PageFlags::LOCKED)
    }

    #[inline]
    pub fn unlock(&self) {
        let was_locked = self.test_and_clear(PageFlags::LOCKED);
        debug_assert!(was_locked, "unlocking unlocked page {:#x}", self.pfn);
    }

    pub fn is_locked(&self) -> bool {
        self.test(PageFlags::LOCKED)
    }

    pub fn is_dirty(&self) -> bool {
        self.test(PageFlags::DIRTY)
    }

    pub fn set_dirty(&self) {
        self.set(PageFlags::DIRTY);
    }

    pub fn is_writeback(&self) -> bool {
        self.test(PageFlags::WRITEBACK)
    }

    pub fn is_active(&self) -> bool {
        self.test(PageFlags::ACTIVE)
    }

    pub fn is_referenced(&self) -> bool {
        self.test(PageFlags::REFERENCED)
    }

    /// Record an access (first touch of the two-touch promotion)
    pub fn mark_referenced(&self) {
        self.set(PageFlags::REFERENCED);
    }

    pub fn on_lru(&self) -> bool {
        self.test(PageFlags::LRU)
    }

    pub fn is_anon(&self) -> bool {
        self.test(PageFlags::ANON)
    }

    pub fn in_swap_cache(&self) -> bool {
        self.test(PageFlags::SWAPCACHE)
    }

    pub fn has_private(&self) -> bool {
        self.test(PageFlags::PRIVATE)
    }

    pub fn set_private(&self) {
        self.set(PageFlags::PRIVATE);
    }

    // ------------------------------------------------------------------
    // Holders and mappings
    // ------------------------------------------------------------------

    /// Pin the page (another path is using it)
    pub fn get(&self) -> u32 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop a pin taken with [`Page::get`]
    pub fn put(&self) -> u32 {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "page {:#x} reference count underflow", self.pfn);
        prev - 1
    }

    pub fn holders(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Add a page-table mapping
    pub fn map(&self) -> u32 {
        let prev = self.mapcount.fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            self.nr_mapped.fetch_add(1, Ordering::AcqRel);
        }
        prev + 1
    }

    /// Remove one page-table mapping
    pub fn unmap(&self) -> u32 {
        let prev = self.mapcount.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "page {:#x} mapcount underflow", self.pfn);
        if prev == 1 {
            self.nr_mapped.fetch_sub(1, Ordering::AcqRel);
        }
        prev - 1
    }

    /// Tear down every mapping at once
    pub fn clear_mappings(&self) -> u32 {
        let prev = self.mapcount.swap(0, Ordering::AcqRel);
        if prev > 0 {
            self.nr_mapped.fetch_sub(1, Ordering::AcqRel);
        }
        prev
    }

    pub fn mapcount(&self) -> u32 {
        self.mapcount.load(Ordering::Acquire)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapcount() > 0
    }

    // ------------------------------------------------------------------
    // Owning cache
    // ------------------------------------------------------------------

    pub fn owner(&self) -> Option<Arc<dyn PageOwner>> {
        self.owner.lock().clone()
    }

    pub fn has_owner(&self) -> bool {
        self.owner.lock().is_some()
    }

    /// Attach the page to a cache (file page)
    pub fn set_owner(&self, owner: Arc<dyn PageOwner>) {
        *self.owner.lock() = Some(owner);
    }

    /// Detach the page from its cache, returning the old owner
    pub fn take_owner(&self) -> Option<Arc<dyn PageOwner>> {
        self.owner.lock().take()
    }

    /// Turn the page into anonymous memory
    pub fn make_anon(&self) {
        *self.owner.lock() = None;
        self.set(PageFlags::ANON);
    }

    /// Wipe all state before the frame goes back to the allocator
    pub(crate) fn reset(&self) {
        debug_assert!(!self.is_mapped(), "freeing mapped page {:#x}", self.pfn);
        self.flags.store(0, Ordering::Release);
        self.count.store(0, Ordering::Release);
        self.clear_mappings();
        *self.owner.lock() = None;
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("pfn", &format_args!("{:#x}", self.pfn))
            .field("zone", &self.zone)
            .field("flags", &self.flags())
            .field("count", &self.holders())
            .field("mapcount", &self.mapcount())
            .field("owned", &self.has_owner())
            .finish()
    }
}
