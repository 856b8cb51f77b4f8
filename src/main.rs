/*!
 * vmscan-sim - Reclaim Simulator
 *
 * Drives one node under synthetic allocation pressure with:
 * - A page cache whose dirty pages go through a simulated disk
 * - An auxiliary object cache registered as a shrinker
 * - The node's kswapd daemon plus direct reclaim on allocation failure
 *
 * Prints a JSON summary of the event counters and LRU state at exit.
 *
 * Usage: vmscan-sim [ROUNDS]
 */

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vmscan::memory::{
    Capabilities, Kswapd, LruCounts, Node, Page, PageOwner, ShrinkableCache, Watermarks, Writeback,
    WritebackStatus, ZoneSpec,
};
use vmscan::{init_tracing, ReclaimConfig, Reclaimer, VmEventSnapshot};

const DEFAULT_ROUNDS: usize = 20_000;
const DISK_LATENCY: Duration = Duration::from_micros(200);

/// Page cache of a single simulated file
struct FileCache {
    pages: AtomicUsize,
}

impl PageOwner for FileCache {
    fn remove_page(&self, _page: &Arc<Page>) -> bool {
        self.pages.fetch_sub(1, Ordering::Relaxed);
        true
    }
}

/// Disk that completes writes asynchronously after a fixed latency
struct SimDisk {
    completions: mpsc::UnboundedSender<Arc<Page>>,
}

impl Writeback for SimDisk {
    fn begin_async_writeback(&self, page: &Arc<Page>) -> WritebackStatus {
        match self.completions.send(Arc::clone(page)) {
            Ok(()) => WritebackStatus::Started,
            Err(_) => WritebackStatus::Error,
        }
    }
}

/// Inode-like object cache that refills as the workload runs
struct ObjectCache {
    objects: AtomicUsize,
}

impl ShrinkableCache for ObjectCache {
    fn pressure(&self, scan: usize, _caps: Capabilities) -> usize {
        if scan > 0 {
            let _ = self
                .objects
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(scan)));
        }
        self.objects.load(Ordering::Acquire)
    }
}

#[derive(Serialize)]
struct Summary {
    rounds: usize,
    direct_reclaims: usize,
    oom: usize,
    object_cache: usize,
    events: VmEventSnapshot,
    zones: BTreeMap<String, ZoneSummary>,
}

#[derive(Serialize)]
struct ZoneSummary {
    free: usize,
    watermarks: Watermarks,
    all_unreclaimable: bool,
    lru: LruCounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let rounds = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<usize>()
            .with_context(|| format!("invalid round count: {}", arg))?,
        None => DEFAULT_ROUNDS,
    };
    let config = ReclaimConfig::from_env().context("reading VMSCAN_* configuration")?;

    let node = Node::new(
        0,
        vec![
            ZoneSpec::new("DMA", 0, 1024).with_watermarks(Watermarks::from_min(32)),
            ZoneSpec::new("Normal", 1024, 8192).with_watermarks(Watermarks::from_min(128)),
        ],
    );

    let (disk_tx, mut disk_rx) = mpsc::unbounded_channel::<Arc<Page>>();
    let reclaimer = Reclaimer::builder()
        .with_config(config)
        .with_node(Arc::clone(&node))
        .with_writeback(Arc::new(SimDisk { completions: disk_tx }))
        .build()
        .context("building reclaimer")?;

    let objects = Arc::new(ObjectCache {
        objects: AtomicUsize::new(50_000),
    });
    let shrinker = reclaimer
        .register_shrinker(2, objects.clone())
        .context("registering object cache")?;

    let disk = {
        let reclaimer = Arc::clone(&reclaimer);
        tokio::spawn(async move {
            while let Some(page) = disk_rx.recv().await {
                tokio::time::sleep(DISK_LATENCY).await;
                reclaimer.end_writeback(&page);
            }
        })
    };

    let kswapd = Kswapd::spawn(Arc::clone(&reclaimer), Arc::clone(&node));
    let file = Arc::new(FileCache {
        pages: AtomicUsize::new(0),
    });

    info!(rounds, "simulation starting");
    let mut direct_reclaims = 0;
    let mut oom = 0;

    for round in 0..rounds {
        let zone = &node.zones()[usize::from(round % 8 == 0) ^ 1];

        let page = match zone.alloc_page() {
            Some(page) => page,
            None => {
                direct_reclaims += 1;
                let zones = node.zones().to_vec();
                let reclaimer = Arc::clone(&reclaimer);
                let result = tokio::task::spawn_blocking(move || {
                    reclaimer.try_to_free_pages(&zones, Capabilities::KERNEL, 32)
                })
                .await
                .context("direct reclaim task")?;
                if let Err(e) = result {
                    if e.is_oom() {
                        oom += 1;
                    }
                    warn!(round, error = %e, "direct reclaim failed");
                }
                tokio::task::yield_now().await;
                continue;
            }
        };

        if round % 5 == 0 {
            page.make_anon();
            page.map();
        } else {
            page.set_owner(file.clone());
            file.pages.fetch_add(1, Ordering::Relaxed);
            if round % 3 == 0 {
                page.set_dirty();
            }
            if round % 11 == 0 {
                page.map();
            }
        }
        zone.add_to_inactive(&page);

        // Re-touch a recent page so some of the working set gets promoted
        if round % 4 == 0 {
            let recent = page.pfn().saturating_sub(3);
            if let Some(hot) = zone.page(recent) {
                if hot.on_lru() {
                    reclaimer.mark_page_accessed(hot);
                    reclaimer.mark_page_accessed(hot);
                }
            }
        }

        reclaimer.wakeup_daemon_if_low(zone);
        objects.objects.fetch_add(3, Ordering::Relaxed);

        if round % 256 == 0 {
            tokio::task::yield_now().await;
        }
    }

    // Let in-flight writeback and the daemon settle
    tokio::time::sleep(Duration::from_millis(50)).await;
    kswapd.shutdown().await;
    reclaimer.unregister_shrinker(shrinker);

    let zones = node
        .zones()
        .iter()
        .map(|zone| {
            let lru = zone
                .check_lru()
                .map_err(|e| anyhow::anyhow!("zone {} LRU check failed: {}", zone.id(), e))?;
            Ok((
                format!("{} ({})", zone.id(), zone.name()),
                ZoneSummary {
                    free: zone.free_pages(),
                    watermarks: zone.watermarks(),
                    all_unreclaimable: zone.all_unreclaimable(),
                    lru,
                },
            ))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    let summary = Summary {
        rounds,
        direct_reclaims,
        oom,
        object_cache: objects.objects.load(Ordering::Relaxed),
        events: reclaimer.events().snapshot(),
        zones,
    };

    drop(reclaimer);
    disk.abort();

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
