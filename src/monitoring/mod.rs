/*!
 * Monitoring Module
 * Structured tracing setup and reclaim event counters
 */

pub mod metrics;
pub mod tracer;

pub use metrics::{VmEventSnapshot, VmEvents};
pub use tracer::init_tracing;
