/*!
 * Memory Module
 * Page descriptors, zones and nodes, and the reclaim engine that ages them
 */

pub mod kswapd;
pub mod lru;
pub mod node;
pub mod page;
pub mod reclaim;
pub mod shrinker;
pub mod traits;
pub mod types;
pub mod zone;

// Re-export for convenience
pub use crate::core::types::{Pfn, ZoneRef};
pub use kswapd::{DaemonState, Kswapd, KswapdCommand, KswapdSignal};
pub use lru::{LruList, Membership, PageVec};
pub use node::Node;
pub use page::{Page, PageFlags};
pub use reclaim::{DirectReclaimReport, Reclaimer, ReclaimerBuilder};
pub use shrinker::{ShrinkStats, ShrinkerHandle, ShrinkerRegistry};
pub use traits::*;
pub use types::*;
pub use zone::{LruCounts, Zone, ZoneLruGuard, ZoneSpec};
