/*!
 * Shrinker Registry Tests
 */

use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use vmscan::memory::{Capabilities, ShrinkableCache, ShrinkerRegistry};
use vmscan::ReclaimError;

/// Cache of `objects` entries that drops whatever it is asked to scan
struct Objects {
    objects: AtomicUsize,
    calls: AtomicUsize,
}

impl Objects {
    fn new(objects: usize) -> Arc<Self> {
        Arc::new(Self {
            objects: AtomicUsize::new(objects),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ShrinkableCache for Objects {
    fn pressure(&self, scan: usize, _caps: Capabilities) -> usize {
        if scan > 0 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self
                .objects
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(scan)));
        }
        self.objects.load(Ordering::SeqCst)
    }
}

#[test]
fn test_zero_seeks_rejected() {
    let registry = ShrinkerRegistry::new();
    let err = registry.register(0, Objects::new(10)).unwrap_err();
    assert_eq!(err, ReclaimError::InvalidSeeks(0));
    assert!(registry.is_empty());
}

#[test]
fn test_pressure_proportional_to_scan_ratio() {
    let registry = ShrinkerRegistry::new();
    let cache = Objects::new(10_000);
    let handle = registry.register(2, cache.clone()).unwrap();

    // 100 of 999 LRU pages scanned: 100 * 2 * 10000 / 1000 = 2000 objects of credit
    let stats = registry.shrink_all(100, 999, Capabilities::KERNEL);
    assert_eq!(stats.calls, 15);
    assert_eq!(stats.scanned, 15 * 128);
    assert_eq!(stats.stalled, 0);
    assert_eq!(registry.pending(handle), Some(2000 - 15 * 128));
    assert_eq!(cache.objects.load(Ordering::SeqCst), 10_000 - 15 * 128);
}

#[test]
fn test_no_scan_no_calls() {
    let registry = ShrinkerRegistry::new();
    let cache = Objects::new(10_000);
    registry.register(2, cache.clone()).unwrap();

    let stats = registry.shrink_all(0, 1000, Capabilities::KERNEL);
    assert_eq!(stats.calls, 0);
    assert_eq!(cache.calls(), 0);
}

#[test]
fn test_every_registered_cache_is_aged() {
    let registry = ShrinkerRegistry::with_batch(16);
    let caches: Vec<_> = (0..4).map(|_| Objects::new(1000)).collect();
    for cache in &caches {
        registry.register(1, cache.clone()).unwrap();
    }
    assert_eq!(registry.len(), 4);

    registry.shrink_all(50, 99, Capabilities::KERNEL);
    assert!(caches.iter().all(|c| c.calls() > 0));
}

#[test]
fn test_unregister_waits_for_running_callback() {
    struct Slow {
        entered: Mutex<Option<mpsc::Sender<()>>>,
        finished: AtomicBool,
        calls: AtomicUsize,
    }

    impl ShrinkableCache for Slow {
        fn pressure(&self, scan: usize, _caps: Capabilities) -> usize {
            if scan > 0 {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(tx) = self.entered.lock().unwrap().take() {
                    let _ = tx.send(());
                    thread::sleep(Duration::from_millis(100));
                    self.finished.store(true, Ordering::SeqCst);
                }
            }
            1000
        }
    }

    let (tx, rx) = mpsc::channel();
    let slow = Arc::new(Slow {
        entered: Mutex::new(Some(tx)),
        finished: AtomicBool::new(false),
        calls: AtomicUsize::new(0),
    });
    let registry = Arc::new(ShrinkerRegistry::new());
    let handle = registry.register(2, slow.clone()).unwrap();

    let worker = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.shrink_all(100, 100, Capabilities::KERNEL))
    };

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(registry.unregister(handle));
    assert!(slow.finished.load(Ordering::SeqCst));

    // The cache reports no progress, so the drain stalls after one call
    let stats = worker.join().unwrap();
    assert_eq!(stats.stalled, 1);

    let calls = slow.calls.load(Ordering::SeqCst);
    registry.shrink_all(100, 100, Capabilities::KERNEL);
    assert_eq!(slow.calls.load(Ordering::SeqCst), calls);
    assert!(!registry.unregister(handle));
}

#[test]
fn test_concurrent_register_and_shrink() {
    let registry = Arc::new(ShrinkerRegistry::with_batch(8));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..50 {
                    let cache = Objects::new(500);
                    let handle = registry.register(1, cache).unwrap();
                    registry.shrink_all(10, 100, Capabilities::KERNEL);
                    assert!(registry.unregister(handle));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(registry.is_empty());
}
