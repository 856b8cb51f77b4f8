/*!
 * Memory Types
 * Common types for page reclaim
 */

use crate::core::limits::{DEF_PRIORITY, DISTRESS_MAX, FULL_SCAN_PRIORITY};
use crate::core::types::PageCount;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reclaim priority
///
/// Inverse measure of scan aggressiveness: at priority `p` every zone offers
/// `nr_inactive >> p` pages per pass, so [`Priority::DEFAULT`] (12) is the
/// lightest scan and [`Priority::FULL_SCAN`] (0) considers the whole list.
/// Reclaim always walks from `DEFAULT` towards `FULL_SCAN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Lightest scan, where every reclaim starts
    pub const DEFAULT: Priority = Priority(DEF_PRIORITY);
    /// Most aggressive scan
    pub const FULL_SCAN: Priority = Priority(FULL_SCAN_PRIORITY);

    /// Build a priority, rejecting values lighter than [`Priority::DEFAULT`]
    pub const fn new(level: u8) -> Option<Self> {
        if level <= DEF_PRIORITY {
            Some(Priority(level))
        } else {
            None
        }
    }

    #[inline]
    pub const fn level(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_default(self) -> bool {
        self.0 == DEF_PRIORITY
    }

    /// Share of a list eligible for scanning at this priority: `pages >> priority`
    #[inline]
    pub const fn scan_share(self, pages: PageCount) -> PageCount {
        pages >> self.0
    }

    /// Reclaim trouble score: `100 >> priority` (0 at DEFAULT, 100 at FULL_SCAN)
    #[inline]
    pub const fn distress(self) -> u32 {
        DISTRESS_MAX >> self.0
    }

    /// Next, more aggressive priority
    pub const fn escalate(self) -> Option<Priority> {
        if self.0 == FULL_SCAN_PRIORITY {
            None
        } else {
            Some(Priority(self.0 - 1))
        }
    }

    /// Every priority from DEFAULT down to FULL_SCAN, strictly descending
    pub fn descending() -> impl Iterator<Item = Priority> {
        (FULL_SCAN_PRIORITY..=DEF_PRIORITY).rev().map(Priority)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// What a reclaim caller allows the engine to do on its behalf
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Capabilities: u8 {
        /// Start writeback of dirty pages
        const WRITEBACK = 1 << 0;
        /// Block on or start block I/O
        const IO = 1 << 1;
        /// Re-enter the filesystem
        const FS = 1 << 2;
        /// Unmap pages and move anonymous memory to swap
        const SWAP = 1 << 3;
    }
}

impl Capabilities {
    /// Ordinary kernel allocation: everything allowed
    pub const KERNEL: Capabilities = Capabilities::all();
    /// Allocation from inside a filesystem
    pub const NOFS: Capabilities = Capabilities::WRITEBACK
        .union(Capabilities::IO)
        .union(Capabilities::SWAP);
    /// Allocation from inside the block layer
    pub const NOIO: Capabilities = Capabilities::SWAP;
    /// Allocation that may not sleep or touch I/O
    pub const ATOMIC: Capabilities = Capabilities::empty();

    #[inline]
    pub fn may_writeback(self) -> bool {
        self.contains(Capabilities::WRITEBACK)
    }

    #[inline]
    pub fn may_enter_fs(self) -> bool {
        self.contains(Capabilities::FS)
    }
}

/// Who is running reclaim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimMode {
    /// Synchronous reclaim inside an allocation
    Direct,
    /// The per-node balancing daemon
    Background,
}

/// Evaluator verdict for one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Return to the inactive list
    Keep,
    /// Promote to the active list (second chance)
    Activate,
    /// Writeback started; the page is parked until completion
    Deferred,
    /// Reclaimed and returned to the allocator
    Free,
}

/// Per-invocation reclaim state
#[derive(Debug, Clone)]
pub struct ScanControl {
    pub priority: Priority,
    pub caps: Capabilities,
    pub mode: ReclaimMode,
    /// Stop once this many pages have been reclaimed
    pub nr_to_reclaim: PageCount,
    /// Inactive pages taken off the LRU
    pub nr_scanned: PageCount,
    /// Pages freed
    pub nr_reclaimed: PageCount,
    /// Mapped pages the evaluator ran into
    pub nr_mapped: PageCount,
    /// Writebacks started
    pub nr_writeback: PageCount,
}

impl ScanControl {
    pub fn new(caps: Capabilities, mode: ReclaimMode, nr_to_reclaim: PageCount) -> Self {
        Self {
            priority: Priority::DEFAULT,
            caps,
            mode,
            nr_to_reclaim,
            nr_scanned: 0,
            nr_reclaimed: 0,
            nr_mapped: 0,
            nr_writeback: 0,
        }
    }

    /// Direct reclaim on behalf of an allocation
    pub fn direct(caps: Capabilities, nr_to_reclaim: PageCount) -> Self {
        Self::new(caps, ReclaimMode::Direct, nr_to_reclaim)
    }

    /// Daemon-side reclaim (always fully capable)
    pub fn background(nr_to_reclaim: PageCount) -> Self {
        Self::new(Capabilities::KERNEL, ReclaimMode::Background, nr_to_reclaim)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    pub fn satisfied(&self) -> bool {
        self.nr_reclaimed >= self.nr_to_reclaim
    }

    /// Pages still wanted
    #[inline]
    pub fn remaining(&self) -> PageCount {
        self.nr_to_reclaim.saturating_sub(self.nr_reclaimed)
    }
}

/// Free-page thresholds of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    pub min: PageCount,
    pub low: PageCount,
    pub high: PageCount,
}

impl Watermarks {
    pub const fn new(min: PageCount, low: PageCount, high: PageCount) -> Self {
        Self { min, low, high }
    }

    /// Classic derivation from `min`: low = 5/4 min, high = 3/2 min
    pub const fn from_min(min: PageCount) -> Self {
        Self {
            min,
            low: min + min / 4,
            high: min + min / 2,
        }
    }

    pub const fn is_ordered(&self) -> bool {
        self.min <= self.low && self.low <= self.high
    }
}

impl Default for Watermarks {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}
