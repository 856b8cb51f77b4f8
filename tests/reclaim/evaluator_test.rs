/*!
 * Evaluator Tests
 * Page disposition against mocked collaborators
 */

use mockall::mock;
use mockall::predicate::always;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use vmscan::memory::{
    Capabilities, Disposition, Page, PageFlags, PageOwner, ReverseMap, ScanControl, SwapBacking,
    UnmapStatus, Writeback, WritebackStatus,
};
use vmscan::{ReclaimConfig, Reclaimer, ZoneRef};

mock! {
    pub Rmap {}
    impl ReverseMap for Rmap {
        fn page_referenced(&self, page: &Arc<Page>) -> bool;
        fn unmap_all(&self, page: &Arc<Page>) -> UnmapStatus;
    }
}

mock! {
    pub Disk {}
    impl Writeback for Disk {
        fn begin_async_writeback(&self, page: &Arc<Page>) -> WritebackStatus;
    }
}

mock! {
    pub Swap {}
    impl SwapBacking for Swap {
        fn allocate_backing(&self, page: &Arc<Page>) -> bool;
        fn total_swap_pages(&self) -> usize;
    }
}

mock! {
    pub Owner {}
    impl PageOwner for Owner {
        fn remove_page(&self, page: &Arc<Page>) -> bool;
        fn release_private(&self, page: &Arc<Page>) -> bool;
        fn can_writeback(&self) -> bool;
    }
}

struct Collaborators {
    rmap: MockRmap,
    disk: MockDisk,
    swap: MockSwap,
}

impl Collaborators {
    fn new() -> Self {
        let mut rmap = MockRmap::new();
        rmap.expect_page_referenced().return_const(false);
        Self {
            rmap,
            disk: MockDisk::new(),
            swap: MockSwap::new(),
        }
    }

    fn build(self) -> Arc<Reclaimer> {
        Reclaimer::builder()
            .with_config(ReclaimConfig::fast_backoff())
            .with_reverse_map(Arc::new(self.rmap))
            .with_writeback(Arc::new(self.disk))
            .with_swap(Arc::new(self.swap))
            .build()
            .unwrap()
    }
}

fn page() -> Arc<Page> {
    let page = Arc::new(Page::new(0x42, ZoneRef::new(0, 0)));
    page.set(PageFlags::LRU);
    page
}

fn owned_page(owner: MockOwner) -> Arc<Page> {
    let page = page();
    page.set_owner(Arc::new(owner));
    page
}

fn evaluate(reclaimer: &Reclaimer, page: &Arc<Page>, caps: Capabilities) -> (Disposition, ScanControl) {
    let mut sc = ScanControl::direct(caps, 1);
    let disposition = reclaimer.evaluate(page, &mut sc);
    (disposition, sc)
}

#[test]
fn test_clean_file_page_is_freed() {
    let reclaimer = Collaborators::new().build();
    let mut owner = MockOwner::new();
    owner.expect_remove_page().times(1).return_const(true);
    let page = owned_page(owner);

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Free);
    assert!(!page.has_owner());
    assert!(!page.is_locked());
}

#[test]
fn test_locked_page_is_skipped() {
    let mut c = Collaborators::new();
    c.rmap.checkpoint();
    c.rmap.expect_page_referenced().times(0);
    let reclaimer = c.build();
    let page = page();
    assert!(page.try_lock());

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Keep);
    assert!(page.is_locked());
}

#[test]
fn test_referenced_mapped_page_is_activated() {
    let mut c = Collaborators::new();
    c.rmap.checkpoint();
    c.rmap.expect_page_referenced().times(1).return_const(true);
    c.rmap.expect_unmap_all().times(0);
    let reclaimer = c.build();
    let page = page();
    page.map();

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Activate);
}

#[test]
fn test_referenced_unmapped_page_is_not_freed() {
    let mut c = Collaborators::new();
    c.rmap.checkpoint();
    c.rmap.expect_page_referenced().times(1).return_const(true);
    c.rmap.expect_unmap_all().times(0);
    let reclaimer = c.build();
    let mut owner = MockOwner::new();
    owner.expect_remove_page().times(0);
    let page = owned_page(owner);

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Keep);
    assert!(page.has_owner());
    assert!(!page.is_locked());
}

#[test]
fn test_referenced_dirty_page_skips_writeback() {
    let mut c = Collaborators::new();
    c.rmap.checkpoint();
    c.rmap.expect_page_referenced().times(1).return_const(true);
    c.disk.expect_begin_async_writeback().times(0);
    let reclaimer = c.build();
    let mut owner = MockOwner::new();
    owner.expect_can_writeback().return_const(true);
    owner.expect_remove_page().times(0);
    let page = owned_page(owner);
    page.set_dirty();

    let (disposition, sc) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Keep);
    assert!(page.is_dirty());
    assert_eq!(sc.nr_writeback, 0);
}

#[test]
fn test_mapped_page_needs_swap_capability() {
    let mut c = Collaborators::new();
    c.rmap.expect_unmap_all().times(0);
    let reclaimer = c.build();
    let page = page();
    page.map();

    let (disposition, sc) = evaluate(&reclaimer, &page, Capabilities::ATOMIC);
    assert_eq!(disposition, Disposition::Keep);
    assert_eq!(sc.nr_mapped, 1);
}

#[test]
fn test_unmap_outcomes() {
    let cases = [
        (UnmapStatus::Again, Disposition::Keep),
        (UnmapStatus::Fail, Disposition::Activate),
    ];
    for (status, expected) in cases {
        let mut c = Collaborators::new();
        c.rmap.expect_unmap_all().times(1).return_const(status);
        let reclaimer = c.build();
        let page = page();
        page.map();

        let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
        assert_eq!(disposition, expected, "unmap returned {:?}", status);
    }
}

#[test]
fn test_unmapped_page_continues_to_free() {
    let mut c = Collaborators::new();
    c.rmap
        .expect_unmap_all()
        .times(1)
        .returning(|page| {
            page.clear_mappings();
            UnmapStatus::Success
        });
    let reclaimer = c.build();
    let mut owner = MockOwner::new();
    owner.expect_remove_page().times(1).return_const(true);
    let page = owned_page(owner);
    page.map();
    page.map();

    let (disposition, sc) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Free);
    assert_eq!(sc.nr_mapped, 1);
}

#[test]
fn test_anon_page_without_swap_slot_is_activated() {
    let mut c = Collaborators::new();
    c.swap.expect_allocate_backing().times(1).return_const(false);
    let reclaimer = c.build();
    let page = page();
    page.make_anon();

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Activate);
    assert!(!page.in_swap_cache());
}

#[test]
fn test_anon_page_goes_to_swap_writeback() {
    let mut c = Collaborators::new();
    c.swap.expect_allocate_backing().times(1).return_const(true);
    c.disk
        .expect_begin_async_writeback()
        .withf(|page| page.is_writeback() && !page.is_dirty() && page.in_swap_cache())
        .times(1)
        .return_const(WritebackStatus::Started);
    let reclaimer = c.build();
    let page = page();
    page.make_anon();

    let (disposition, sc) = evaluate(&reclaimer, &page, Capabilities::NOFS);
    assert_eq!(disposition, Disposition::Deferred);
    assert_eq!(sc.nr_writeback, 1);
    assert!(page.test(PageFlags::RECLAIM));
}

#[test]
fn test_dirty_file_page_needs_fs() {
    let mut c = Collaborators::new();
    c.disk.expect_begin_async_writeback().times(0);
    let reclaimer = c.build();
    let mut owner = MockOwner::new();
    owner.expect_can_writeback().return_const(true);
    owner.expect_remove_page().times(0);
    let page = owned_page(owner);
    page.set_dirty();

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::NOFS);
    assert_eq!(disposition, Disposition::Keep);
    assert!(page.is_dirty());
}

#[test]
fn test_owner_without_writeback_keeps_dirty_page() {
    let mut c = Collaborators::new();
    c.disk.expect_begin_async_writeback().times(0);
    let reclaimer = c.build();
    let mut owner = MockOwner::new();
    owner.expect_can_writeback().times(1).return_const(false);
    let page = owned_page(owner);
    page.set_dirty();

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Keep);
}

#[test]
fn test_writeback_outcomes_restore_flags() {
    let cases = [
        (WritebackStatus::Activated, Disposition::Activate),
        (WritebackStatus::Error, Disposition::Keep),
    ];
    for (status, expected) in cases {
        let mut c = Collaborators::new();
        c.disk
            .expect_begin_async_writeback()
            .with(always())
            .times(1)
            .return_const(status);
        let reclaimer = c.build();
        let mut owner = MockOwner::new();
        owner.expect_can_writeback().return_const(true);
        let page = owned_page(owner);
        page.set_dirty();

        let (disposition, sc) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
        assert_eq!(disposition, expected, "writeback returned {:?}", status);
        assert!(page.is_dirty());
        assert!(!page.is_writeback());
        assert!(!page.test(PageFlags::RECLAIM));
        assert_eq!(sc.nr_writeback, 0);
    }
}

#[test]
fn test_private_buffers_released_before_detach() {
    let reclaimer = Collaborators::new().build();
    let mut owner = MockOwner::new();
    owner.expect_release_private().times(1).return_const(true);
    owner.expect_remove_page().times(1).return_const(true);
    let page = owned_page(owner);
    page.set_private();

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Free);
    assert!(!page.has_private());
}

#[test]
fn test_busy_private_buffers_keep_page() {
    let reclaimer = Collaborators::new().build();
    let mut owner = MockOwner::new();
    owner.expect_release_private().times(1).return_const(false);
    owner.expect_remove_page().times(0);
    let page = owned_page(owner);
    page.set_private();

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Keep);
    assert!(page.has_owner());
}

#[test]
fn test_extra_holder_blocks_detach() {
    let reclaimer = Collaborators::new().build();
    let mut owner = MockOwner::new();
    owner.expect_remove_page().times(0);
    let page = owned_page(owner);
    page.get();

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Keep);
    assert!(page.has_owner());
}

#[test]
fn test_owner_refusing_removal_keeps_page() {
    let reclaimer = Collaborators::new().build();
    let mut owner = MockOwner::new();
    owner.expect_remove_page().times(1).return_const(false);
    let page = owned_page(owner);

    let (disposition, _) = evaluate(&reclaimer, &page, Capabilities::KERNEL);
    assert_eq!(disposition, Disposition::Keep);
    assert!(page.has_owner());
}
