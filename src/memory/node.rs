/*!
 * Node
 * A memory node: its zones and the wakeup handle of its balancing daemon
 */

use super::kswapd::KswapdSignal;
use super::zone::{Zone, ZoneSpec};
use crate::core::types::{NodeId, PageCount, ZoneId, ZoneRef};
use log::info;
use std::sync::Arc;

/// Memory node
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    zones: Vec<Arc<Zone>>,
    kswapd: KswapdSignal,
}

impl Node {
    /// Build a node; zones are numbered in the order given, lowest first
    pub fn new(id: NodeId, specs: impl IntoIterator<Item = ZoneSpec>) -> Arc<Self> {
        let zones: Vec<Arc<Zone>> = specs
            .into_iter()
            .enumerate()
            .map(|(idx, spec)| Zone::new(ZoneRef::new(id, idx as ZoneId), spec))
            .collect();

        info!(
            "Node {} initialized with {} zones ({} pages)",
            id,
            zones.len(),
            zones.iter().map(|z| z.present_pages()).sum::<PageCount>()
        );

        Arc::new(Self {
            id,
            zones,
            kswapd: KswapdSignal::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn zones(&self) -> &[Arc<Zone>] {
        &self.zones
    }

    pub fn zone(&self, zone: ZoneId) -> Option<&Arc<Zone>> {
        self.zones.get(zone as usize)
    }

    pub fn kswapd(&self) -> &KswapdSignal {
        &self.kswapd
    }

    pub fn present_pages(&self) -> PageCount {
        self.zones.iter().map(|z| z.present_pages()).sum()
    }

    pub fn free_pages(&self) -> PageCount {
        self.zones.iter().map(|z| z.free_pages()).sum()
    }

    /// Active plus inactive pages across every zone
    pub fn nr_lru_pages(&self) -> PageCount {
        self.zones.iter().map(|z| z.nr_lru_pages()).sum()
    }

    /// Some zone is at or below its low watermark
    pub fn is_low(&self) -> bool {
        self.zones.iter().any(|z| z.is_low())
    }

    /// Every zone is at or above its high watermark
    pub fn is_balanced(&self) -> bool {
        self.zones.iter().all(|z| z.is_balanced())
    }

    pub fn needs_balance(&self) -> bool {
        !self.is_balanced()
    }
}
