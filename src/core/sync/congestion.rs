/*!
 * Congestion Wait
 *
 * Bounded backoff used by reclaim between priority levels. A waiter sleeps
 * until either the timeout elapses or a writeback completion signals that
 * some I/O finished, whichever comes first. Never called with a zone lock held.
 */

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Writeback congestion wait queue
///
/// # Performance
///
/// - Completion side is a relaxed load when nobody is waiting
/// - Generation counter filters spurious condvar wakeups
pub struct CongestionWait {
    generation: Mutex<u64>,
    condvar: Condvar,
    waiters: AtomicUsize,
}

impl CongestionWait {
    pub fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            condvar: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Sleep until a completion is signalled or `timeout` elapses
    ///
    /// Returns `true` if woken by a completion, `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return false;
        }

        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        let start_generation = *generation;

        self.waiters.fetch_add(1, Ordering::AcqRel);
        let woken = loop {
            if *generation != start_generation {
                break true;
            }
            if self
                .condvar
                .wait_until(&mut generation, deadline)
                .timed_out()
            {
                break *generation != start_generation;
            }
        };
        self.waiters.fetch_sub(1, Ordering::AcqRel);

        woken
    }

    /// Wake every waiter (called when writeback completes)
    pub fn notify_all(&self) -> usize {
        let waiting = self.waiters.load(Ordering::Acquire);
        if waiting == 0 {
            return 0;
        }

        *self.generation.lock() += 1;
        self.condvar.notify_all();
        waiting
    }

    /// Number of threads currently backing off
    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }
}

impl Default for CongestionWait {
    fn default() -> Self {
        Self::new()
    }
}
