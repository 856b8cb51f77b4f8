/*!
 * LRU Invariant Tests
 * Random operation sequences against a zone; after every step the lists,
 * the page flags and the frame accounting must still agree
 */

use super::support::{fixture_with, QueuedDisk, TestCache};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use vmscan::memory::{
    Capabilities, Disposition, Page, PageFlags, Priority, ScanControl, SwapBacking, Watermarks,
};
use vmscan::ZoneRef;

const PAGES: usize = 64;
const START_PFN: u64 = 0x1000;

#[derive(Debug, Clone)]
enum Op {
    Alloc { active: bool, dirty: bool, mapped: bool },
    Touch(u64),
    Detach(u64),
    Reattach(u64),
    Shrink { nr: usize, nofs: bool },
    Refill(usize),
    CompleteWriteback,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<bool>(), any::<bool>(), any::<bool>())
            .prop_map(|(active, dirty, mapped)| Op::Alloc { active, dirty, mapped }),
        2 => (0..PAGES as u64).prop_map(Op::Touch),
        1 => (0..PAGES as u64).prop_map(Op::Detach),
        1 => (0..PAGES as u64).prop_map(Op::Reattach),
        2 => (1usize..48, any::<bool>()).prop_map(|(nr, nofs)| Op::Shrink { nr, nofs }),
        1 => (1usize..48).prop_map(Op::Refill),
        1 => Just(Op::CompleteWriteback),
    ]
}

/// Swap device that either always or never hands out slots
struct FixedSwap(bool);

impl SwapBacking for FixedSwap {
    fn allocate_backing(&self, _page: &Arc<Page>) -> bool {
        self.0
    }

    fn total_swap_pages(&self) -> usize {
        if self.0 { 1024 } else { 0 }
    }
}

#[derive(Debug, Clone)]
struct PageState {
    dirty: bool,
    referenced: bool,
    mapped: bool,
    anon: bool,
    private: bool,
    holders: u32,
}

fn page_state() -> impl Strategy<Value = PageState> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), 0u32..3).prop_map(
        |(dirty, referenced, mapped, anon, private, holders)| PageState {
            dirty,
            referenced,
            mapped,
            anon,
            private,
            holders,
        },
    )
}

fn caps() -> impl Strategy<Value = Capabilities> {
    prop_oneof![
        Just(Capabilities::KERNEL),
        Just(Capabilities::NOFS),
        Just(Capabilities::NOIO),
        Just(Capabilities::ATOMIC),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_evaluate_never_frees_in_use_pages(
        state in page_state(),
        caps in caps(),
        swap_slots in any::<bool>(),
    ) {
        let disk = QueuedDisk::new();
        let fx = fixture_with(8, Watermarks::new(1, 2, 4), |b| {
            b.with_writeback(disk.clone())
                .with_swap(Arc::new(FixedSwap(swap_slots)))
        });
        let cache = TestCache::new();

        let page = Arc::new(Page::new(0x42, ZoneRef::new(0, 0)));
        page.set(PageFlags::LRU);
        if state.anon {
            page.make_anon();
        } else {
            page.set_owner(cache.clone());
        }
        if state.dirty {
            page.set_dirty();
        }
        if state.referenced {
            page.mark_referenced();
        }
        if state.mapped {
            page.map();
        }
        if state.private {
            page.set_private();
        }
        for _ in 0..state.holders {
            page.get();
        }

        let mut sc = ScanControl::direct(caps, 1);
        let disposition = fx.reclaimer.evaluate(&page, &mut sc);
        prop_assert!(!page.is_locked());

        if disposition == Disposition::Free {
            prop_assert!(!state.referenced, "referenced page freed: {:?}", state);
            prop_assert!(!state.dirty, "dirty page freed: {:?}", state);
            prop_assert!(!state.mapped || caps.contains(Capabilities::SWAP));
            prop_assert_eq!(state.holders, 0);
            prop_assert!(!page.is_mapped());
            prop_assert!(!page.is_dirty());
            prop_assert!(!page.has_owner());
        }

        // Dirty contents stay either on the page or in flight to the disk
        if state.dirty {
            prop_assert!(page.is_dirty() || page.is_writeback());
            if page.is_writeback() {
                prop_assert_eq!(disposition, Disposition::Deferred);
                prop_assert_eq!(disk.take().len(), 1);
            }
        }
        if !caps.contains(Capabilities::WRITEBACK) {
            prop_assert!(disk.take().is_empty());
        }
        if state.anon && !swap_slots {
            prop_assert_ne!(disposition, Disposition::Free);
        }
    }

    #[test]
    fn prop_zone_accounting_holds(ops in proptest::collection::vec(op(), 1..120)) {
        let disk = QueuedDisk::new();
        let fx = fixture_with(PAGES, Watermarks::new(2, 4, 8), |b| b.with_writeback(disk.clone()));
        let cache = TestCache::new();
        let mut detached: HashSet<u64> = HashSet::new();

        for op in ops {
            match op {
                Op::Alloc { active, dirty, mapped } => {
                    if let Some(page) = fx.zone.alloc_page() {
                        page.set_owner(cache.clone());
                        if dirty {
                            page.set_dirty();
                        }
                        if mapped {
                            page.map();
                        }
                        if active {
                            fx.zone.add_to_active(&page);
                        } else {
                            fx.zone.add_to_inactive(&page);
                        }
                    }
                }
                Op::Touch(off) => {
                    let page = fx.zone.page(START_PFN + off).unwrap();
                    if page.on_lru() {
                        fx.reclaimer.mark_page_accessed(page);
                    }
                }
                Op::Detach(off) => {
                    let page = fx.zone.page(START_PFN + off).unwrap();
                    if fx.zone.remove_from_lru(page) {
                        detached.insert(page.pfn());
                    }
                }
                Op::Reattach(off) => {
                    let page = fx.zone.page(START_PFN + off).unwrap();
                    if detached.remove(&page.pfn()) {
                        fx.zone.add_to_inactive(page);
                    }
                }
                Op::Shrink { nr, nofs } => {
                    let caps = if nofs { Capabilities::NOFS } else { Capabilities::KERNEL };
                    let mut sc = ScanControl::direct(caps, nr).with_priority(Priority::FULL_SCAN);
                    let before = fx.zone.free_pages();
                    let freed = fx.reclaimer.shrink_cache(&fx.zone, nr, &mut sc);
                    prop_assert_eq!(fx.zone.free_pages(), before + freed);
                    prop_assert!(sc.nr_scanned <= nr);
                }
                Op::Refill(nr) => {
                    let sc = ScanControl::background(0);
                    let before = fx.zone.nr_active();
                    let demoted = fx.reclaimer.refill_inactive_zone(&fx.zone, nr, &sc);
                    prop_assert!(demoted <= before.min(nr));
                    prop_assert_eq!(fx.zone.nr_active(), before - demoted);
                }
                Op::CompleteWriteback => {
                    for page in disk.take() {
                        fx.reclaimer.end_writeback(&page);
                    }
                }
            }

            let counts = fx.zone.check_lru().map_err(TestCaseError::fail)?;
            prop_assert_eq!(counts.isolated, 0);
            prop_assert_eq!(counts.writeback, fx.zone.nr_writeback());
            prop_assert_eq!(
                counts.active + counts.inactive + counts.writeback + detached.len() + fx.zone.free_pages(),
                PAGES
            );
        }
    }

    #[test]
    fn prop_direct_reclaim_never_revisits_a_priority(
        clean in 0usize..200,
        pinned in 0usize..40,
        want in 1usize..64,
    ) {
        let fx = fixture_with(256, Watermarks::new(4, 8, 16), |b| b);
        let cache = TestCache::new();
        for i in 0..clean + pinned {
            let page = fx.zone.alloc_page().unwrap();
            page.set_owner(cache.clone());
            if i < pinned {
                page.get();
            }
            fx.zone.add_to_inactive(&page);
        }

        let report = fx.reclaimer.direct_reclaim(fx.node.zones(), Capabilities::KERNEL, want);
        prop_assert!(report.priorities.windows(2).all(|w| w[0] > w[1]));
        prop_assert!(report.reclaimed <= clean);
        prop_assert_eq!(report.reclaimed, cache.removed());
        if report.satisfied() {
            prop_assert!(report.reclaimed >= want);
        } else {
            prop_assert_eq!(report.priorities.last(), Some(&Priority::FULL_SCAN));
        }
        fx.zone.check_lru().map_err(TestCaseError::fail)?;
    }
}
