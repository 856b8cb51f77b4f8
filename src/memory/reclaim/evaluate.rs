/*!
 * Page Disposition
 *
 * Decides the fate of each page in an isolated batch. Runs without the zone
 * lock; each page is held under its own page lock for the duration of the
 * decision. First matching rule wins, in this order:
 *
 * 1. Locked elsewhere or under writeback: keep
 * 2. Recently referenced: activate if mapped, keep otherwise
 * 3. Anonymous without a swap slot: allocate one or activate
 * 4. Mapped: unmap (needs `SWAP`)
 * 5. Dirty: start async writeback if the caller and the owner allow it
 * 6. Private buffers: release through the owner
 * 7. Detach from the owning cache (or the swap cache)
 * 8. Nothing holds the page any more: free
 */

use super::Reclaimer;
use crate::memory::page::{Page, PageFlags};
use crate::memory::traits::{UnmapStatus, WritebackStatus};
use crate::memory::types::{Capabilities, Disposition, ScanControl};
use crate::monitoring::VmEvents;
use std::sync::Arc;

/// Verdicts for an isolated batch, grouped for putback
#[derive(Debug, Default)]
pub(crate) struct BatchVerdicts {
    pub keep: Vec<Arc<Page>>,
    pub activate: Vec<Arc<Page>>,
    pub deferred: Vec<Arc<Page>>,
    pub free: Vec<Arc<Page>>,
}

impl BatchVerdicts {
    fn push(&mut self, disposition: Disposition, page: Arc<Page>) {
        match disposition {
            Disposition::Keep => self.keep.push(page),
            Disposition::Activate => self.activate.push(page),
            Disposition::Deferred => self.deferred.push(page),
            Disposition::Free => self.free.push(page),
        }
    }
}

impl Reclaimer {
    /// Evaluate every page of an isolated batch
    pub(crate) fn shrink_list(&self, pages: Vec<Arc<Page>>, sc: &mut ScanControl) -> BatchVerdicts {
        let mut verdicts = BatchVerdicts::default();
        for page in pages {
            let disposition = self.evaluate(&page, sc);
            tracing::trace!(pfn = page.pfn(), ?disposition, "page evaluated");
            verdicts.push(disposition, page);
        }

        VmEvents::add(&self.events.pgactivate, verdicts.activate.len());
        verdicts
    }

    /// Disposition of one isolated page
    pub fn evaluate(&self, page: &Arc<Page>, sc: &mut ScanControl) -> Disposition {
        if !page.try_lock() {
            return Disposition::Keep;
        }
        let disposition = self.evaluate_locked(page, sc);
        page.unlock();
        disposition
    }

    fn evaluate_locked(&self, page: &Arc<Page>, sc: &mut ScanControl) -> Disposition {
        if page.is_writeback() {
            return Disposition::Keep;
        }

        if self.rmap.page_referenced(page) {
            // An unmapped page gets one more trip around the inactive list
            return if page.is_mapped() {
                Disposition::Activate
            } else {
                Disposition::Keep
            };
        }

        if page.is_anon() && !page.in_swap_cache() {
            if !self.swap.allocate_backing(page) {
                return Disposition::Activate;
            }
            page.set(PageFlags::SWAPCACHE | PageFlags::DIRTY);
        }

        if page.is_mapped() || page.in_swap_cache() {
            sc.nr_mapped += 1;
        }

        if page.is_mapped() {
            if !sc.caps.contains(Capabilities::SWAP) {
                return Disposition::Keep;
            }
            match self.rmap.unmap_all(page) {
                UnmapStatus::Success => {}
                UnmapStatus::Again => return Disposition::Keep,
                UnmapStatus::Fail => return Disposition::Activate,
            }
        }

        let owner = page.owner();

        if page.is_dirty() {
            let io_cap = if page.in_swap_cache() {
                Capabilities::IO
            } else {
                Capabilities::FS
            };
            if !sc.caps.contains(Capabilities::WRITEBACK | io_cap) {
                return Disposition::Keep;
            }
            let Some(writeback) = self.writeback.as_ref() else {
                return Disposition::Keep;
            };
            if owner.as_ref().is_some_and(|o| !o.can_writeback()) {
                return Disposition::Keep;
            }
            if owner.is_none() && !page.in_swap_cache() {
                return Disposition::Keep;
            }

            // Completion may arrive before begin_async_writeback returns
            page.set(PageFlags::WRITEBACK | PageFlags::RECLAIM);
            page.clear(PageFlags::DIRTY);
            return match writeback.begin_async_writeback(page) {
                WritebackStatus::Started => {
                    sc.nr_writeback += 1;
                    VmEvents::add(&self.events.pgwriteback, 1);
                    Disposition::Deferred
                }
                WritebackStatus::Activated => {
                    Self::undo_writeback(page);
                    Disposition::Activate
                }
                WritebackStatus::Error => {
                    Self::undo_writeback(page);
                    Disposition::Keep
                }
            };
        }

        if page.has_private() {
            match owner.as_ref() {
                Some(o) if o.release_private(page) => page.clear(PageFlags::PRIVATE),
                _ => return Disposition::Keep,
            }
        }

        if let Some(o) = owner.as_ref() {
            if page.holders() > 0 || page.is_dirty() {
                return Disposition::Keep;
            }
            if !o.remove_page(page) {
                return Disposition::Keep;
            }
            page.take_owner();
        } else if page.in_swap_cache() {
            if page.holders() > 0 || page.is_dirty() {
                return Disposition::Keep;
            }
            page.clear(PageFlags::SWAPCACHE);
        }

        if !page.has_owner() && page.holders() == 0 && !page.is_mapped() && !page.is_dirty() {
            Disposition::Free
        } else {
            Disposition::Keep
        }
    }

    fn undo_writeback(page: &Page) {
        page.clear(PageFlags::WRITEBACK | PageFlags::RECLAIM);
        page.set(PageFlags::DIRTY);
    }
}
