/*!
 * Reclaim Limits and Constants
 *
 * Centralized location for the reclaim heuristics' constants.
 * Organized by component for maintainability and discoverability.
 *
 * ## Notes
 * - The tunable ones are defaults for `ReclaimConfig`, not hard limits
 * - Performance-critical constants are marked with [PERF]
 * - Values matching the classic Linux 2.6 VM are marked with [LINUX-COMPAT]
 */

use std::time::Duration;

// =============================================================================
// PRIORITY
// =============================================================================

/// Lightest scan priority: each zone contributes `nr_inactive >> 12` pages
/// [LINUX-COMPAT] DEF_PRIORITY
pub const DEF_PRIORITY: u8 = 12;

/// Heaviest scan priority: the whole inactive list is eligible
pub const FULL_SCAN_PRIORITY: u8 = 0;

/// Distress score at priority 0; halves with every priority step
pub const DISTRESS_MAX: u32 = 100;

/// `swap_tendency` at or above this value demotes mapped pages
pub const SWAP_TENDENCY_THRESHOLD: u32 = 100;

// =============================================================================
// SCANNING
// =============================================================================

/// Pages taken from an LRU list per lock acquisition
/// [PERF] Bounds zone lock hold time to O(batch) list surgery
/// [LINUX-COMPAT] SWAP_CLUSTER_MAX
pub const SWAP_CLUSTER_MAX: usize = 32;

/// Refill is capped at this many scan batches per call
pub const REFILL_BATCH_LIMIT: usize = 4;

/// Default `vm_swappiness`
/// [LINUX-COMPAT]
pub const DEFAULT_SWAPPINESS: u32 = 60;

/// Zone is declared unreclaimable after scanning this many times its
/// present pages without reclaiming anything
pub const UNRECLAIMABLE_SCAN_RATIO: u64 = 2;

/// Pagevec capacity for batched LRU insertion and release
/// [LINUX-COMPAT] PAGEVEC_SIZE
pub const PAGEVEC_SIZE: usize = 14;

// =============================================================================
// SHRINKERS
// =============================================================================

/// Shrinker credit threshold and maximum objects per callback invocation
/// [LINUX-COMPAT] SHRINK_BATCH
pub const SHRINK_BATCH: usize = 128;

/// Default seeks cost for a shrinker
pub const DEFAULT_SEEKS: usize = 2;

// =============================================================================
// BACKOFF
// =============================================================================

/// Bounded wait for writeback congestion to ease between priority levels
/// [LINUX-COMPAT] blk_congestion_wait(WRITE, HZ/10)
pub const CONGESTION_WAIT: Duration = Duration::from_millis(100);

/// Congestion waits only start below this many steps from DEF_PRIORITY
pub const CONGESTION_WAIT_PRIORITY_SLACK: u8 = 2;
