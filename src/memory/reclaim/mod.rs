/*!
 * Page Reclaim
 *
 * The reclaim engine: per-page disposition, zone scanning and aging, and the
 * priority loop shared by direct reclaim and the balancing daemons.
 *
 * ## Layers
 *
 * - **evaluate**: keep / activate / write back / free, one page at a time
 * - **scanner**: inactive-list shrinking and active-list refill for a zone
 * - **coordinator**: priority escalation over zones, shrinker pressure, backoff
 *
 * All state lives in the zones; `Reclaimer` only holds collaborators, the
 * shrinker registry and the congestion wait queue, so any number of threads
 * may run reclaim through one shared instance.
 */

mod coordinator;
mod evaluate;
mod scanner;

pub use coordinator::DirectReclaimReport;

use super::node::Node;
use super::page::Page;
use super::shrinker::{ShrinkerHandle, ShrinkerRegistry};
use super::traits::{
    CountingAllocator, FlagReverseMap, NoSwap, PageAllocator, ReverseMap, ShrinkableCache,
    SwapBacking, Writeback,
};
use super::zone::Zone;
use crate::core::config::ReclaimConfig;
use crate::core::errors::{ConfigError, ReclaimResult};
use crate::core::sync::CongestionWait;
use crate::core::types::{PageCount, ZoneRef};
use crate::monitoring::VmEvents;
use log::info;
use std::sync::Arc;

/// Page reclaim engine
pub struct Reclaimer {
    config: ReclaimConfig,
    nodes: Vec<Arc<Node>>,
    allocator: Arc<dyn PageAllocator>,
    writeback: Option<Arc<dyn Writeback>>,
    rmap: Arc<dyn ReverseMap>,
    swap: Arc<dyn SwapBacking>,
    shrinkers: ShrinkerRegistry,
    congestion: CongestionWait,
    events: Arc<VmEvents>,
}

impl Reclaimer {
    pub fn builder() -> ReclaimerBuilder {
        ReclaimerBuilder::new()
    }

    pub fn config(&self) -> &ReclaimConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn node(&self, id: u16) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Resolve a zone address
    pub fn zone(&self, zone: ZoneRef) -> Option<&Arc<Zone>> {
        self.node(zone.node)?.zone(zone.zone)
    }

    /// The zone a page belongs to
    pub fn zone_of(&self, page: &Page) -> Option<&Arc<Zone>> {
        self.zone(page.zone())
    }

    /// Every zone of every node, in node order
    pub fn all_zones(&self) -> Vec<Arc<Zone>> {
        self.nodes
            .iter()
            .flat_map(|n| n.zones().iter().cloned())
            .collect()
    }

    pub fn events(&self) -> &Arc<VmEvents> {
        &self.events
    }

    pub fn shrinkers(&self) -> &ShrinkerRegistry {
        &self.shrinkers
    }

    pub fn congestion(&self) -> &CongestionWait {
        &self.congestion
    }

    /// Register an auxiliary cache with the shrinker registry
    pub fn register_shrinker(
        &self,
        seeks: usize,
        cache: Arc<dyn ShrinkableCache>,
    ) -> ReclaimResult<ShrinkerHandle> {
        self.shrinkers.register(seeks, cache)
    }

    /// Remove a shrinker; its callback is never invoked once this returns
    pub fn unregister_shrinker(&self, handle: ShrinkerHandle) -> bool {
        self.shrinkers.unregister(handle)
    }

    /// Allocation-path watermark check: wake the node's daemon when the zone
    /// is at or below its low watermark. Returns whether a wakeup was raised.
    pub fn wakeup_daemon_if_low(&self, zone: &Zone) -> bool {
        if !zone.is_low() {
            return false;
        }
        let Some(node) = self.node(zone.id().node) else {
            return false;
        };
        let woken = node.kswapd().wake();
        if woken {
            VmEvents::add(&self.events.kswapd_wakeups, 1);
            tracing::debug!(zone = %zone.id(), free = zone.free_pages(), "kswapd wakeup");
        }
        woken
    }

    /// Writeback completion for a page whose I/O reclaim started.
    /// A page written for reclaim goes to the reclaim end of the inactive list.
    pub fn end_writeback(&self, page: &Arc<Page>) {
        let Some(zone) = self.zone_of(page) else {
            tracing::warn!(pfn = page.pfn(), "writeback completion for unknown zone");
            return;
        };
        let rotated = zone.lock_lru().complete_writeback(page);
        if rotated == Some(true) {
            VmEvents::add(&self.events.pgrotated, 1);
        }
        self.congestion.notify_all();
    }

    /// Access path: two-touch promotion to the active list
    pub fn mark_page_accessed(&self, page: &Arc<Page>) {
        let Some(zone) = self.zone_of(page) else {
            return;
        };
        if zone.mark_page_accessed(page) {
            VmEvents::add(&self.events.pgactivate, 1);
        }
    }

    /// Total active and inactive pages over a set of zones
    fn lru_pages(zones: &[Arc<Zone>]) -> PageCount {
        zones.iter().map(|z| z.nr_lru_pages()).sum()
    }
}

impl std::fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reclaimer")
            .field("config", &self.config)
            .field("nodes", &self.nodes.len())
            .field("writeback", &self.writeback.is_some())
            .field("shrinkers", &self.shrinkers)
            .finish()
    }
}

/// Builder for [`Reclaimer`]
pub struct ReclaimerBuilder {
    config: ReclaimConfig,
    nodes: Vec<Arc<Node>>,
    allocator: Option<Arc<dyn PageAllocator>>,
    writeback: Option<Arc<dyn Writeback>>,
    rmap: Option<Arc<dyn ReverseMap>>,
    swap: Option<Arc<dyn SwapBacking>>,
    events: Option<Arc<VmEvents>>,
}

impl ReclaimerBuilder {
    pub fn new() -> Self {
        Self {
            config: ReclaimConfig::default(),
            nodes: Vec::new(),
            allocator: None,
            writeback: None,
            rmap: None,
            swap: None,
            events: None,
        }
    }

    pub fn with_config(mut self, config: ReclaimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_node(mut self, node: Arc<Node>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Receives frames reclaim frees (default: counter only)
    pub fn with_allocator(mut self, allocator: Arc<dyn PageAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Writeback path for dirty pages (default: none, dirty pages are kept)
    pub fn with_writeback(mut self, writeback: Arc<dyn Writeback>) -> Self {
        self.writeback = Some(writeback);
        self
    }

    /// Reverse mapping (default: page flags only)
    pub fn with_reverse_map(mut self, rmap: Arc<dyn ReverseMap>) -> Self {
        self.rmap = Some(rmap);
        self
    }

    /// Swap-slot allocator (default: no swap)
    pub fn with_swap(mut self, swap: Arc<dyn SwapBacking>) -> Self {
        self.swap = Some(swap);
        self
    }

    /// Share an event counter block with other components
    pub fn with_events(mut self, events: Arc<VmEvents>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Arc<Reclaimer>, ConfigError> {
        self.config.validate()?;

        info!(
            "Reclaimer initialized: {} nodes, swappiness={}, cluster={}, writeback={}",
            self.nodes.len(),
            self.config.swappiness,
            self.config.swap_cluster_max,
            self.writeback.is_some()
        );

        Ok(Arc::new(Reclaimer {
            shrinkers: ShrinkerRegistry::with_batch(self.config.shrink_batch),
            config: self.config,
            nodes: self.nodes,
            allocator: self.allocator.unwrap_or_else(|| Arc::new(CountingAllocator)),
            writeback: self.writeback,
            rmap: self.rmap.unwrap_or_else(|| Arc::new(FlagReverseMap)),
            swap: self.swap.unwrap_or_else(|| Arc::new(NoSwap)),
            congestion: CongestionWait::new(),
            events: self.events.unwrap_or_default(),
        }))
    }
}

impl Default for ReclaimerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
