/*!
 * Memory Traits
 * Interfaces between the reclaim engine and its collaborators
 */

use super::page::{Page, PageFlags};
use super::types::Capabilities;
use super::zone::Zone;
use crate::core::types::PageCount;
use std::sync::Arc;

/// Allocator side: receives frames reclaim has freed
pub trait PageAllocator: Send + Sync {
    /// Put a reclaimed page back on the free lists
    ///
    /// The zone's free-page counter has already been raised and the page
    /// descriptor wiped when this runs.
    fn free_page(&self, zone: &Zone, page: &Arc<Page>);
}

/// Outcome of asking the writeback path to clean a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritebackStatus {
    /// I/O submitted; completion arrives through `Reclaimer::end_writeback`
    Started,
    /// The backing store refuses to let the page go; keep it hot
    Activated,
    /// Writeback could not be started
    Error,
}

/// Writeback path
pub trait Writeback: Send + Sync {
    /// Start non-blocking writeback of a dirty page
    ///
    /// Called with `WRITEBACK` already set and `DIRTY` cleared, so completion
    /// may be signalled before this returns.
    fn begin_async_writeback(&self, page: &Arc<Page>) -> WritebackStatus;
}

/// Outcome of removing every page-table mapping of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapStatus {
    Success,
    /// Transient failure; retry on a later pass
    Again,
    /// The page cannot be unmapped (locked into memory)
    Fail,
}

/// Reverse-mapping subsystem
pub trait ReverseMap: Send + Sync {
    /// Test and clear the page's accessed state
    fn page_referenced(&self, page: &Arc<Page>) -> bool;

    /// Remove every page-table mapping of the page
    fn unmap_all(&self, page: &Arc<Page>) -> UnmapStatus;
}

/// Swap-slot allocator
pub trait SwapBacking: Send + Sync {
    /// Give an anonymous page a swap slot
    fn allocate_backing(&self, page: &Arc<Page>) -> bool;

    /// Configured swap space; zero means anonymous pages cannot be evicted
    fn total_swap_pages(&self) -> PageCount;
}

/// The cache that owns a file page (an address space)
pub trait PageOwner: Send + Sync {
    /// Drop the cache's reference to a clean, unpinned page
    ///
    /// Returns `false` if someone raced with reclaim (page looked up again).
    fn remove_page(&self, page: &Arc<Page>) -> bool;

    /// Detach private metadata (buffer heads) without I/O
    fn release_private(&self, _page: &Arc<Page>) -> bool {
        false
    }

    /// Whether dirty pages of this cache can be written back at all
    fn can_writeback(&self) -> bool {
        true
    }
}

/// Auxiliary cache that is aged outside the page LRU
pub trait ShrinkableCache: Send + Sync {
    /// With `scan == 0`, report how many objects the cache holds.
    /// Otherwise try to free up to `scan` objects and return how many remain.
    fn pressure(&self, scan: usize, caps: Capabilities) -> usize;
}

// =============================================================================
// Default collaborators
// =============================================================================

/// Reverse map driven purely by page state: the referenced bit stands in for
/// page-table accessed bits and unmapping always succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct FlagReverseMap;

impl ReverseMap for FlagReverseMap {
    fn page_referenced(&self, page: &Arc<Page>) -> bool {
        page.test_and_clear(PageFlags::REFERENCED)
    }

    fn unmap_all(&self, page: &Arc<Page>) -> UnmapStatus {
        page.clear_mappings();
        UnmapStatus::Success
    }
}

/// No swap device configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSwap;

impl SwapBacking for NoSwap {
    fn allocate_backing(&self, _page: &Arc<Page>) -> bool {
        false
    }

    fn total_swap_pages(&self) -> PageCount {
        0
    }
}

/// Allocator that only relies on the zone's free counter
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingAllocator;

impl PageAllocator for CountingAllocator {
    fn free_page(&self, _zone: &Zone, _page: &Arc<Page>) {}
}
