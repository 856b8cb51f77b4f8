/*!
 * Reclaim Coordinator
 *
 * Priority loops over zones for the two reclaim modes:
 *
 * - Direct reclaim (`try_to_free_pages`) runs inside a failing allocation
 *   and stops as soon as the request is covered
 * - Node balancing (`balance_pgdat`) runs from the daemon and restores every
 *   zone to its high watermark, or frees an explicit target for suspend
 *
 * Both walk priority from DEFAULT (lightest) to FULL_SCAN, never revisiting a
 * level, age auxiliary caches in proportion to the pages scanned, and back
 * off on writeback congestion between the deeper levels.
 */

use super::Reclaimer;
use crate::core::errors::{ReclaimError, ReclaimResult};
use crate::core::limits::CONGESTION_WAIT_PRIORITY_SLACK;
use crate::core::types::PageCount;
use crate::memory::node::Node;
use crate::memory::types::{Capabilities, Priority, ScanControl};
use crate::memory::zone::Zone;
use crate::monitoring::VmEvents;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a direct reclaim call did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectReclaimReport {
    pub requested: PageCount,
    pub reclaimed: PageCount,
    pub scanned: PageCount,
    /// Priorities visited, in order
    pub priorities: Vec<Priority>,
    /// Gave up early because the caller may not enter the filesystem
    pub fs_restricted: bool,
}

impl DirectReclaimReport {
    pub fn satisfied(&self) -> bool {
        self.reclaimed >= self.requested
    }

    /// Allocation-path view of the report
    pub fn into_result(self) -> ReclaimResult<PageCount> {
        if self.satisfied() {
            Ok(self.reclaimed)
        } else if self.fs_restricted {
            Err(ReclaimError::FsRestricted {
                requested: self.requested,
                reclaimed: self.reclaimed,
            })
        } else if self.reclaimed == 0 {
            Err(ReclaimError::OutOfMemory {
                requested: self.requested,
                scanned: self.scanned,
            })
        } else {
            Err(ReclaimError::Shortfall {
                requested: self.requested,
                reclaimed: self.reclaimed,
            })
        }
    }
}

impl Reclaimer {
    /// Congestion waits start this far below DEFAULT
    fn should_backoff(priority: Priority, scanned: PageCount) -> bool {
        scanned > 0
            && priority.level() < Priority::DEFAULT.level() - CONGESTION_WAIT_PRIORITY_SLACK
    }

    fn congestion_backoff(&self) {
        let woken = self.congestion.wait(self.config.congestion_wait());
        tracing::trace!(woken, "congestion backoff");
    }

    /// One direct-reclaim pass at `sc.priority` over the candidate zones.
    /// Zones flagged all-unreclaimable are only polled at DEFAULT.
    pub fn shrink_caches(&self, zones: &[Arc<Zone>], sc: &mut ScanControl) {
        for zone in zones {
            if sc.satisfied() {
                break;
            }
            if zone.all_unreclaimable() && !sc.priority.is_default() {
                continue;
            }
            let max_scan = sc.priority.scan_share(zone.nr_inactive());
            self.shrink_zone(zone, max_scan, sc);
        }
    }

    /// Synchronous reclaim on behalf of an allocation
    pub fn try_to_free_pages(
        &self,
        zones: &[Arc<Zone>],
        caps: Capabilities,
        nr_pages: PageCount,
    ) -> ReclaimResult<PageCount> {
        self.direct_reclaim(zones, caps, nr_pages).into_result()
    }

    /// [`Reclaimer::try_to_free_pages`] with the full account of what happened
    #[tracing::instrument(level = "debug", skip(self, zones), fields(zones = zones.len()))]
    pub fn direct_reclaim(
        &self,
        zones: &[Arc<Zone>],
        caps: Capabilities,
        nr_pages: PageCount,
    ) -> DirectReclaimReport {
        VmEvents::add(&self.events.allocstall, 1);

        let mut report = DirectReclaimReport {
            requested: nr_pages,
            reclaimed: 0,
            scanned: 0,
            priorities: Vec::new(),
            fs_restricted: false,
        };

        for priority in Priority::descending() {
            report.priorities.push(priority);

            let mut sc = ScanControl::direct(caps, report.requested - report.reclaimed)
                .with_priority(priority);
            self.shrink_caches(zones, &mut sc);

            let stats = self
                .shrinkers
                .shrink_all(sc.nr_scanned, Self::lru_pages(zones), caps);
            VmEvents::add(&self.events.slabs_scanned, stats.scanned);

            report.scanned += sc.nr_scanned;
            report.reclaimed += sc.nr_reclaimed;

            if report.satisfied() {
                break;
            }
            if !caps.may_enter_fs() {
                report.fs_restricted = true;
                break;
            }
            if Self::should_backoff(priority, sc.nr_scanned) {
                self.congestion_backoff();
            }
        }

        if report.satisfied() {
            tracing::debug!(
                reclaimed = report.reclaimed,
                scanned = report.scanned,
                passes = report.priorities.len(),
                "direct reclaim satisfied"
            );
        } else if report.reclaimed == 0 && !report.fs_restricted {
            VmEvents::add(&self.events.oom_kill_triggers, 1);
            tracing::warn!(
                requested = report.requested,
                scanned = report.scanned,
                "direct reclaim made no progress at full priority"
            );
        } else {
            tracing::info!(
                requested = report.requested,
                reclaimed = report.reclaimed,
                fs_restricted = report.fs_restricted,
                "direct reclaim fell short"
            );
        }
        report
    }

    /// Restore a node's zones to their high watermarks (`nr_pages == 0`), or
    /// free `nr_pages` from the node regardless of watermarks. Returns pages
    /// freed.
    #[tracing::instrument(level = "debug", skip(self, node), fields(node = node.id()))]
    pub fn balance_pgdat(&self, node: &Node, nr_pages: PageCount) -> PageCount {
        let daemon_mode = nr_pages == 0;
        if daemon_mode && node.is_balanced() {
            return 0;
        }
        VmEvents::add(&self.events.pageoutrun, 1);

        let ratio = self.config.unreclaimable_scan_ratio;
        let mut total_reclaimed: PageCount = 0;

        for priority in Priority::descending() {
            let mut pass_scanned: PageCount = 0;

            for zone in node.zones() {
                if zone.all_unreclaimable() && !priority.is_default() {
                    continue;
                }

                let target = if daemon_mode {
                    if zone.is_balanced() {
                        continue;
                    }
                    zone.balance_deficit()
                } else {
                    nr_pages.saturating_sub(total_reclaimed)
                };
                if target == 0 {
                    continue;
                }

                let mut sc = ScanControl::background(target).with_priority(priority);
                let max_scan = priority.scan_share(zone.nr_inactive());
                let reclaimed = self.shrink_zone(zone, max_scan, &mut sc);
                total_reclaimed += reclaimed;
                pass_scanned += sc.nr_scanned;

                if reclaimed == 0
                    && zone.scanned_since_reclaim() > ratio * zone.present_pages() as u64
                    && zone.mark_unreclaimable()
                {
                    VmEvents::add(&self.events.zone_unreclaimable, 1);
                }
            }

            let stats = self.shrinkers.shrink_all(
                pass_scanned,
                node.nr_lru_pages(),
                Capabilities::KERNEL,
            );
            VmEvents::add(&self.events.slabs_scanned, stats.scanned);

            let done = if daemon_mode {
                node.is_balanced()
            } else {
                total_reclaimed >= nr_pages
            };
            if done {
                break;
            }
            if Self::should_backoff(priority, pass_scanned) {
                self.congestion_backoff();
            }
        }

        tracing::debug!(reclaimed = total_reclaimed, balanced = node.is_balanced(), "balance_pgdat");
        total_reclaimed
    }

    /// Free `nr_pages` from one node with repeated explicit-target passes,
    /// stopping when a pass frees nothing
    pub fn shrink_node(&self, node: &Node, nr_pages: PageCount) -> PageCount {
        let mut freed: PageCount = 0;
        while freed < nr_pages {
            let pass = self.balance_pgdat(node, nr_pages - freed);
            if pass == 0 {
                break;
            }
            freed += pass;
        }
        freed
    }

    /// Suspend helper: free `nr_pages` across all nodes
    #[tracing::instrument(level = "info", skip(self))]
    pub fn shrink_all_memory(&self, nr_pages: PageCount) -> PageCount {
        let mut freed: PageCount = 0;
        for node in &self.nodes {
            if freed >= nr_pages {
                break;
            }
            freed += self.shrink_node(node, nr_pages - freed);
        }
        tracing::info!(requested = nr_pages, freed, "shrink_all_memory");
        freed
    }
}
