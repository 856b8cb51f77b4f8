/*!
 * Kswapd - Background Node Balancing
 *
 * One long-lived tokio task per node. It sleeps until an allocation drives a
 * zone to its low watermark, then runs `balance_pgdat` until every zone is
 * back at its high watermark. Reclaim itself is synchronous and runs on the
 * blocking pool; the task only sequences passes and handles control messages.
 *
 * ## States
 *
 * - `Sleeping`: waiting for a wakeup
 * - `Balancing`: running passes; further wakeups coalesce into this cycle
 * - `Frozen`: after a suspend pass; wakeups are ignored until thawed
 */

use super::node::Node;
use super::reclaim::Reclaimer;
use crate::core::types::PageCount;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};

/// Daemon state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DaemonState {
    Sleeping = 0,
    Balancing = 1,
    Frozen = 2,
}

impl DaemonState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => DaemonState::Balancing,
            2 => DaemonState::Frozen,
            _ => DaemonState::Sleeping,
        }
    }
}

/// Wakeup handle embedded in each node
///
/// Wakeups are edge-triggered: only the first wakeup while `Sleeping` is
/// delivered, everything else is coalesced.
#[derive(Debug)]
pub struct KswapdSignal {
    notify: Notify,
    state: AtomicU8,
    pending: AtomicBool,
    wakeups: AtomicU64,
    cycles: AtomicU64,
}

impl KswapdSignal {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
            state: AtomicU8::new(DaemonState::Sleeping as u8),
            pending: AtomicBool::new(false),
            wakeups: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> DaemonState {
        DaemonState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DaemonState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Raise a wakeup; returns `false` if it was coalesced or ignored
    pub fn wake(&self) -> bool {
        if self.state() != DaemonState::Sleeping {
            return false;
        }
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.wakeups.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        true
    }

    /// Wakeups delivered to the daemon
    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }

    /// Balancing cycles completed
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

impl Default for KswapdSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Control messages for a daemon
#[derive(Debug)]
pub enum KswapdCommand {
    /// Free pages for suspend, then freeze
    ShrinkAll {
        nr_pages: PageCount,
        reply: oneshot::Sender<PageCount>,
    },
    /// Leave the frozen state
    Thaw,
    /// Stop the task
    Shutdown,
}

/// Handle to a node's balancing daemon
pub struct Kswapd {
    node: Arc<Node>,
    command_tx: mpsc::UnboundedSender<KswapdCommand>,
    stop: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Kswapd {
    /// Spawn the daemon for one node. Must be called inside a tokio runtime.
    pub fn spawn(reclaimer: Arc<Reclaimer>, node: Arc<Node>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(run_kswapd_loop(
            reclaimer,
            Arc::clone(&node),
            command_rx,
            Arc::clone(&stop),
        ));

        info!("kswapd{} spawned", node.id());

        Self {
            node,
            command_tx,
            stop,
            handle: Some(handle),
        }
    }

    /// Spawn one daemon per node of the reclaimer
    pub fn spawn_all(reclaimer: &Arc<Reclaimer>) -> Vec<Kswapd> {
        reclaimer
            .nodes()
            .iter()
            .map(|node| Self::spawn(Arc::clone(reclaimer), Arc::clone(node)))
            .collect()
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn state(&self) -> DaemonState {
        self.node.kswapd().state()
    }

    /// Run a suspend pass on this node and freeze the daemon
    pub async fn shrink_all(&self, nr_pages: PageCount) -> PageCount {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(KswapdCommand::ShrinkAll { nr_pages, reply })
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Resume normal balancing after a suspend pass
    pub fn thaw(&self) {
        let _ = self.command_tx.send(KswapdCommand::Thaw);
    }

    /// Stop the daemon; an in-progress cycle stops after its current pass
    pub async fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.command_tx.send(KswapdCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("kswapd{} shutdown error: {}", self.node.id(), e);
            } else {
                info!("kswapd{} shutdown complete", self.node.id());
            }
        }
    }
}

impl Drop for Kswapd {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.store(true, Ordering::Release);
            let _ = self.command_tx.send(KswapdCommand::Shutdown);
        }
    }
}

async fn run_kswapd_loop(
    reclaimer: Arc<Reclaimer>,
    node: Arc<Node>,
    mut command_rx: mpsc::UnboundedReceiver<KswapdCommand>,
    stop: Arc<AtomicBool>,
) {
    let signal = node.kswapd();
    info!("kswapd{} started", node.id());

    loop {
        tokio::select! {
            _ = signal.notify.notified() => {
                if signal.state() == DaemonState::Frozen {
                    signal.pending.store(false, Ordering::Release);
                    continue;
                }
                balance_cycle(&reclaimer, &node, &stop).await;
                if stop.load(Ordering::Acquire) {
                    break;
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(KswapdCommand::ShrinkAll { nr_pages, reply }) => {
                        signal.set_state(DaemonState::Balancing);
                        let freed = {
                            let reclaimer = Arc::clone(&reclaimer);
                            let target = Arc::clone(&node);
                            tokio::task::spawn_blocking(move || reclaimer.shrink_node(&target, nr_pages))
                                .await
                                .unwrap_or_else(|e| {
                                    warn!("kswapd{} suspend pass failed: {}", node.id(), e);
                                    0
                                })
                        };
                        signal.set_state(DaemonState::Frozen);
                        signal.pending.store(false, Ordering::Release);
                        info!("kswapd{} frozen after freeing {} pages", node.id(), freed);
                        let _ = reply.send(freed);
                    }

                    Some(KswapdCommand::Thaw) => {
                        if signal.state() == DaemonState::Frozen {
                            signal.set_state(DaemonState::Sleeping);
                            info!("kswapd{} thawed", node.id());
                            if node.is_low() && signal.wake() {
                                crate::monitoring::VmEvents::add(&reclaimer.events().kswapd_wakeups, 1);
                            }
                        }
                    }

                    Some(KswapdCommand::Shutdown) | None => {
                        info!("kswapd{} shutting down", node.id());
                        break;
                    }
                }
            }
        }
    }
}

/// Balance until every zone reaches its high watermark or a pass frees nothing
async fn balance_cycle(reclaimer: &Arc<Reclaimer>, node: &Arc<Node>, stop: &AtomicBool) {
    let signal = node.kswapd();
    signal.set_state(DaemonState::Balancing);
    signal.pending.store(false, Ordering::Release);

    let mut passes = 0usize;
    let mut freed_total: PageCount = 0;
    while !stop.load(Ordering::Acquire) {
        let freed = {
            let reclaimer = Arc::clone(reclaimer);
            let target = Arc::clone(node);
            match tokio::task::spawn_blocking(move || reclaimer.balance_pgdat(&target, 0)).await {
                Ok(freed) => freed,
                Err(e) => {
                    warn!("kswapd{} balance pass failed: {}", node.id(), e);
                    0
                }
            }
        };
        passes += 1;
        freed_total += freed;

        if freed == 0 || node.is_balanced() {
            break;
        }
    }

    signal.cycles.fetch_add(1, Ordering::Relaxed);
    signal.set_state(DaemonState::Sleeping);
    tracing::info!(
        node = node.id(),
        passes,
        freed = freed_total,
        balanced = node.is_balanced(),
        "kswapd cycle complete"
    );

    // Pressure that arrived during the last pass was coalesced away
    if freed_total > 0 && node.is_low() && signal.wake() {
        crate::monitoring::VmEvents::add(&reclaimer.events().kswapd_wakeups, 1);
    }
}
