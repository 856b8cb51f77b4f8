/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::core::types::PageCount;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for reclaim entry points
pub type ReclaimResult<T> = Result<T, ReclaimError>;

/// Reclaim errors surfaced to the allocator and to cache subsystems
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ReclaimError {
    #[error("Out of memory: reclaimed nothing for a {requested}-page request after scanning {scanned} pages at full priority")]
    #[diagnostic(
        code(reclaim::out_of_memory),
        help("Every candidate zone is pinned, dirty or mapped. The caller should escalate to its OOM policy.")
    )]
    OutOfMemory {
        requested: PageCount,
        scanned: PageCount,
    },

    #[error("Reclaim shortfall: freed {reclaimed} of {requested} pages")]
    #[diagnostic(
        code(reclaim::shortfall),
        help("Some progress was made. Retrying the allocation may succeed once writeback completes.")
    )]
    Shortfall {
        requested: PageCount,
        reclaimed: PageCount,
    },

    #[error("Reclaim restricted: freed {reclaimed} of {requested} pages without filesystem re-entry")]
    #[diagnostic(
        code(reclaim::fs_restricted),
        help("The caller may not enter the filesystem. Handle the failure without waiting on writeback.")
    )]
    FsRestricted {
        requested: PageCount,
        reclaimed: PageCount,
    },

    #[error("Shrinker registration failed: {0}")]
    #[diagnostic(
        code(reclaim::shrinker_registration),
        help("The registry could not grow. Free memory before registering more caches.")
    )]
    ShrinkerRegistration(String),

    #[error("Invalid shrinker seeks value: {0}")]
    #[diagnostic(
        code(reclaim::invalid_seeks),
        help("Seeks must be at least 1; a zero-cost cache would never accrue scan credit.")
    )]
    InvalidSeeks(usize),
}

impl ReclaimError {
    /// Whether the caller should escalate to its out-of-memory policy
    pub fn is_oom(&self) -> bool {
        matches!(self, ReclaimError::OutOfMemory { .. })
    }

    /// Pages reclaimed before the call gave up
    pub fn reclaimed(&self) -> PageCount {
        match self {
            ReclaimError::Shortfall { reclaimed, .. }
            | ReclaimError::FsRestricted { reclaimed, .. } => *reclaimed,
            _ => 0,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Swappiness out of range: {0}")]
    #[diagnostic(code(config::swappiness), help("vm_swappiness must be between 0 and 100."))]
    InvalidSwappiness(u32),

    #[error("{0} must be greater than zero")]
    #[diagnostic(code(config::zero_value), help("Batch sizes and ratios cannot be zero."))]
    ZeroValue(String),

    #[error("Invalid value for {key}: {value}")]
    #[diagnostic(code(config::invalid_env), help("Environment overrides must be unsigned integers."))]
    InvalidEnv { key: String, value: String },

    #[error("Failed to parse configuration: {0}")]
    #[diagnostic(code(config::parse), help("Check the JSON document against ReclaimConfig's fields."))]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
