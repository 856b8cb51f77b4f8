/*!
 * Reclaim Configuration
 *
 * Runtime tunables for the scanner, the coordinator and the shrinker registry.
 * Defaults reproduce the classic heuristics; every field can be overridden
 * from JSON or from `VMSCAN_*` environment variables.
 */

use super::errors::ConfigError;
use super::limits;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Reclaim tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ReclaimConfig {
    /// Preference for reclaiming mapped memory (0..=100)
    pub swappiness: u32,
    /// Pages per LRU batch and refill-counter trigger
    pub swap_cluster_max: usize,
    /// Shrinker credit threshold and per-call object cap
    pub shrink_batch: usize,
    /// Refill is capped at `swap_cluster_max * refill_batch_limit` pages
    pub refill_batch_limit: usize,
    /// Congestion backoff between priority levels, in milliseconds
    pub congestion_wait_ms: u64,
    /// Scans-without-progress multiple of present pages that marks a zone unreclaimable
    pub unreclaimable_scan_ratio: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            swappiness: limits::DEFAULT_SWAPPINESS,
            swap_cluster_max: limits::SWAP_CLUSTER_MAX,
            shrink_batch: limits::SHRINK_BATCH,
            refill_batch_limit: limits::REFILL_BATCH_LIMIT,
            congestion_wait_ms: limits::CONGESTION_WAIT.as_millis() as u64,
            unreclaimable_scan_ratio: limits::UNRECLAIMABLE_SCAN_RATIO,
        }
    }
}

impl ReclaimConfig {
    /// Configuration with a short backoff, for tests and simulations
    pub fn fast_backoff() -> Self {
        Self {
            congestion_wait_ms: 1,
            ..Default::default()
        }
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `VMSCAN_*` environment variables
    ///
    /// Environment variables:
    /// - VMSCAN_SWAPPINESS
    /// - VMSCAN_SWAP_CLUSTER_MAX
    /// - VMSCAN_SHRINK_BATCH
    /// - VMSCAN_REFILL_BATCH_LIMIT
    /// - VMSCAN_CONGESTION_WAIT_MS
    /// - VMSCAN_UNRECLAIMABLE_SCAN_RATIO
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_var("VMSCAN_SWAPPINESS")? {
            config.swappiness = v;
        }
        if let Some(v) = env_var("VMSCAN_SWAP_CLUSTER_MAX")? {
            config.swap_cluster_max = v;
        }
        if let Some(v) = env_var("VMSCAN_SHRINK_BATCH")? {
            config.shrink_batch = v;
        }
        if let Some(v) = env_var("VMSCAN_REFILL_BATCH_LIMIT")? {
            config.refill_batch_limit = v;
        }
        if let Some(v) = env_var("VMSCAN_CONGESTION_WAIT_MS")? {
            config.congestion_wait_ms = v;
        }
        if let Some(v) = env_var("VMSCAN_UNRECLAIMABLE_SCAN_RATIO")? {
            config.unreclaimable_scan_ratio = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scanner cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.swappiness > 100 {
            return Err(ConfigError::InvalidSwappiness(self.swappiness));
        }
        if self.swap_cluster_max == 0 {
            return Err(ConfigError::ZeroValue("swap_cluster_max".into()));
        }
        if self.shrink_batch == 0 {
            return Err(ConfigError::ZeroValue("shrink_batch".into()));
        }
        if self.refill_batch_limit == 0 {
            return Err(ConfigError::ZeroValue("refill_batch_limit".into()));
        }
        if self.unreclaimable_scan_ratio == 0 {
            return Err(ConfigError::ZeroValue("unreclaimable_scan_ratio".into()));
        }
        Ok(())
    }

    pub fn with_swappiness(mut self, swappiness: u32) -> Self {
        self.swappiness = swappiness;
        self
    }

    pub fn congestion_wait(&self) -> Duration {
        Duration::from_millis(self.congestion_wait_ms)
    }

    /// Upper bound on a single refill pass
    pub fn refill_cap(&self) -> usize {
        self.swap_cluster_max.saturating_mul(self.refill_batch_limit)
    }
}

/// Environment override parsed into the field type; out-of-range values fail
fn env_var<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
