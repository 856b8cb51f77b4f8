/*!
 * Core Types
 * Identity types shared across the reclaim engine
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Page frame number (opaque physical identity handed out by the allocator)
pub type Pfn = u64;

/// Memory node identifier
pub type NodeId = u16;

/// Zone index within a node (0 = lowest zone, e.g. DMA)
pub type ZoneId = u16;

/// Page count type used for every list and watermark figure
pub type PageCount = usize;

/// Fully qualified zone address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneRef {
    pub node: NodeId,
    pub zone: ZoneId,
}

impl ZoneRef {
    pub const fn new(node: NodeId, zone: ZoneId) -> Self {
        Self { node, zone }
    }
}

impl fmt::Display for ZoneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}/zone{}", self.node, self.zone)
    }
}
