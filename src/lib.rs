/*!
 * vmscan
 * Page reclamation engine: zone LRU aging, shrinkers, direct reclaim and
 * per-node balancing daemons
 */

pub mod core;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use crate::core::{ConfigError, ReclaimConfig, ReclaimError, ReclaimResult};
pub use crate::core::types::{NodeId, PageCount, Pfn, ZoneId, ZoneRef};
pub use memory::{
    Capabilities, DirectReclaimReport, Disposition, Kswapd, Node, Page, PageFlags, Priority,
    Reclaimer, ShrinkerHandle, Zone, ZoneSpec,
};
pub use monitoring::{init_tracing, VmEventSnapshot, VmEvents};
