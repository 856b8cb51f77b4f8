/*!
 * Synchronization Primitives
 *
 * Wait/notify primitives used by reclaim outside of any zone lock:
 * - Congestion wait: bounded backoff between priority levels, cut short by
 *   writeback completions
 */

mod congestion;

pub use congestion::CongestionWait;
