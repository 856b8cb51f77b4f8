/*!
 * Shared fixtures for reclaim tests
 */

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vmscan::memory::{
    Node, Page, PageOwner, ReclaimerBuilder, Watermarks, Writeback, WritebackStatus, Zone,
    ZoneSpec,
};
use vmscan::{ReclaimConfig, Reclaimer};

/// One node, one zone
pub struct Fixture {
    pub reclaimer: Arc<Reclaimer>,
    pub node: Arc<Node>,
    pub zone: Arc<Zone>,
}

pub fn fixture(pages: usize, watermarks: Watermarks) -> Fixture {
    fixture_with(pages, watermarks, |b| b)
}

pub fn fixture_with(
    pages: usize,
    watermarks: Watermarks,
    customize: impl FnOnce(ReclaimerBuilder) -> ReclaimerBuilder,
) -> Fixture {
    let node = Node::new(
        0,
        vec![ZoneSpec::new("Normal", 0x1000, pages).with_watermarks(watermarks)],
    );
    let zone = Arc::clone(&node.zones()[0]);
    let builder = Reclaimer::builder()
        .with_config(ReclaimConfig::fast_backoff())
        .with_node(Arc::clone(&node));
    let reclaimer = customize(builder).build().expect("valid config");
    Fixture {
        reclaimer,
        node,
        zone,
    }
}

/// Page cache that counts removals
#[derive(Default)]
pub struct TestCache {
    pub removed: AtomicUsize,
}

impl TestCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }
}

impl PageOwner for TestCache {
    fn remove_page(&self, _page: &Arc<Page>) -> bool {
        self.removed.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Writeback device that queues pages until the test completes them
#[derive(Default)]
pub struct QueuedDisk {
    pub queued: Mutex<Vec<Arc<Page>>>,
}

impl QueuedDisk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<Arc<Page>> {
        std::mem::take(&mut *self.queued.lock())
    }
}

impl Writeback for QueuedDisk {
    fn begin_async_writeback(&self, page: &Arc<Page>) -> WritebackStatus {
        self.queued.lock().push(Arc::clone(page));
        WritebackStatus::Started
    }
}

/// Allocate `n` clean file pages owned by `cache` onto the inactive list
pub fn fill_inactive(zone: &Zone, cache: &Arc<TestCache>, n: usize) -> Vec<Arc<Page>> {
    (0..n)
        .map(|_| {
            let page = zone.alloc_page().expect("zone has free frames");
            page.set_owner(cache.clone());
            zone.add_to_inactive(&page);
            page
        })
        .collect()
}

/// Allocate `n` clean file pages owned by `cache` onto the active list
pub fn fill_active(zone: &Zone, cache: &Arc<TestCache>, n: usize) -> Vec<Arc<Page>> {
    (0..n)
        .map(|_| {
            let page = zone.alloc_page().expect("zone has free frames");
            page.set_owner(cache.clone());
            zone.add_to_active(&page);
            page
        })
        .collect()
}

/// Allocate until the zone is at or below its low watermark
pub fn drain_to_low(zone: &Zone, cache: &Arc<TestCache>) -> Vec<Arc<Page>> {
    let mut pages = Vec::new();
    while !zone.is_low() {
        pages.extend(fill_inactive(zone, cache, 1));
    }
    pages
}
