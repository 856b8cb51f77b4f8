/*!
 * VM Event Counters
 * Lock-free reclaim statistics, in the spirit of /proc/vmstat
 */

use crate::core::types::ZoneRef;
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reclaim event counters
///
/// # Performance
/// - Cache-line aligned to prevent false sharing between the daemon and
///   direct reclaimers bumping counters concurrently
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct VmEvents {
    /// Inactive pages taken by direct reclaim
    pub pgscan_direct: AtomicU64,
    /// Inactive pages taken by the balancing daemon
    pub pgscan_kswapd: AtomicU64,
    /// Pages freed by reclaim
    pub pgsteal: AtomicU64,
    /// Pages promoted to the active list
    pub pgactivate: AtomicU64,
    /// Pages demoted to the inactive list
    pub pgdeactivate: AtomicU64,
    /// Active pages examined by aging
    pub pgrefill: AtomicU64,
    /// Pages moved to the reclaim end after writeback
    pub pgrotated: AtomicU64,
    /// Asynchronous writebacks started by reclaim
    pub pgwriteback: AtomicU64,
    /// Objects handed to shrinkers
    pub slabs_scanned: AtomicU64,
    /// Direct reclaim entries
    pub allocstall: AtomicU64,
    /// Daemon wakeups that were not coalesced
    pub kswapd_wakeups: AtomicU64,
    /// balance_pgdat invocations
    pub pageoutrun: AtomicU64,
    /// Zones marked all-unreclaimable
    pub zone_unreclaimable: AtomicU64,
    /// Direct reclaim calls that ended in OutOfMemory
    pub oom_kill_triggers: AtomicU64,
    steal_by_zone: DashMap<ZoneRef, u64, RandomState>,
}

impl VmEvents {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, value: usize) {
        if value > 0 {
            counter.fetch_add(value as u64, Ordering::Relaxed);
        }
    }

    /// Record pages freed from a specific zone
    pub(crate) fn record_steal(&self, zone: ZoneRef, freed: usize) {
        if freed == 0 {
            return;
        }
        Self::add(&self.pgsteal, freed);
        *self.steal_by_zone.entry(zone).or_insert(0) += freed as u64;
    }

    /// Pages freed from one zone since startup
    pub fn zone_steal(&self, zone: ZoneRef) -> u64 {
        self.steal_by_zone.get(&zone).map(|v| *v).unwrap_or(0)
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> VmEventSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        VmEventSnapshot {
            pgscan_direct: load(&self.pgscan_direct),
            pgscan_kswapd: load(&self.pgscan_kswapd),
            pgsteal: load(&self.pgsteal),
            pgactivate: load(&self.pgactivate),
            pgdeactivate: load(&self.pgdeactivate),
            pgrefill: load(&self.pgrefill),
            pgrotated: load(&self.pgrotated),
            pgwriteback: load(&self.pgwriteback),
            slabs_scanned: load(&self.slabs_scanned),
            allocstall: load(&self.allocstall),
            kswapd_wakeups: load(&self.kswapd_wakeups),
            pageoutrun: load(&self.pageoutrun),
            zone_unreclaimable: load(&self.zone_unreclaimable),
            oom_kill_triggers: load(&self.oom_kill_triggers),
            steal_by_zone: self
                .steal_by_zone
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
        }
    }
}

/// Point-in-time copy of [`VmEvents`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VmEventSnapshot {
    pub pgscan_direct: u64,
    pub pgscan_kswapd: u64,
    pub pgsteal: u64,
    pub pgactivate: u64,
    pub pgdeactivate: u64,
    pub pgrefill: u64,
    pub pgrotated: u64,
    pub pgwriteback: u64,
    pub slabs_scanned: u64,
    pub allocstall: u64,
    pub kswapd_wakeups: u64,
    pub pageoutrun: u64,
    pub zone_unreclaimable: u64,
    pub oom_kill_triggers: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub steal_by_zone: BTreeMap<String, u64>,
}

impl VmEventSnapshot {
    /// Total inactive pages scanned by either mode
    pub fn pgscan(&self) -> u64 {
        self.pgscan_direct + self.pgscan_kswapd
    }

    /// Reclaim efficiency: pages freed per page scanned
    pub fn steal_ratio(&self) -> f64 {
        let scanned = self.pgscan();
        if scanned == 0 {
            0.0
        } else {
            self.pgsteal as f64 / scanned as f64
        }
    }
}
