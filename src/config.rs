//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{FloodgateError, Result};

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,
}

impl FloodgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FloodgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse config: {}", e)))?;
        config.limiter.validate()?;
        Ok(config)
    }
}

/// Configuration for a single limiter instance.
///
/// Capacities and rates are `f64` so fractional refill rates work. Negative
/// values are not rejected here; the token bucket clamps them to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum tokens in the stable tier
    #[serde(default = "default_stable_capacity")]
    pub stable_capacity: f64,

    /// Stable tier refill rate, tokens per second
    #[serde(default = "default_stable_rate")]
    pub stable_rate: f64,

    /// Maximum tokens in the burst tier
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: f64,

    /// Burst tier refill rate, tokens per second
    #[serde(default = "default_burst_rate")]
    pub burst_rate: f64,

    /// Consecutive admission failures that trip the breaker
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,

    /// How long the breaker rejects everything once tripped
    #[serde(default = "default_reject_duration")]
    pub reject_duration_ms: u64,

    /// Maximum wait queue length (0 = unbounded)
    #[serde(default = "default_queue_max_len")]
    pub queue_max_len: usize,

    /// Period of the background sweep that drops expired queue items
    #[serde(default = "default_queue_cleanup_interval")]
    pub queue_cleanup_interval_ms: u64,

    /// Worker pause when the queue is empty or the breaker is open
    #[serde(default = "default_worker_interval")]
    pub worker_interval_ms: u64,

    /// Worker pause between token attempts for a dequeued item
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,

    /// Maximum time an item may wait in the queue
    #[serde(default = "default_queue_item_ttl")]
    pub queue_item_ttl_ms: u64,

    /// How long the worker should wait for a token on a dequeued item.
    ///
    /// Advisory only: exceeding it is logged, the item keeps retrying.
    #[serde(default = "default_token_wait_timeout")]
    pub token_wait_timeout_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            stable_capacity: default_stable_capacity(),
            stable_rate: default_stable_rate(),
            burst_capacity: default_burst_capacity(),
            burst_rate: default_burst_rate(),
            fail_threshold: default_fail_threshold(),
            reject_duration_ms: default_reject_duration(),
            queue_max_len: default_queue_max_len(),
            queue_cleanup_interval_ms: default_queue_cleanup_interval(),
            worker_interval_ms: default_worker_interval(),
            retry_interval_ms: default_retry_interval(),
            queue_item_ttl_ms: default_queue_item_ttl(),
            token_wait_timeout_ms: default_token_wait_timeout(),
        }
    }
}

fn default_stable_capacity() -> f64 {
    5.0
}

fn default_stable_rate() -> f64 {
    1.0
}

fn default_burst_capacity() -> f64 {
    10.0
}

fn default_burst_rate() -> f64 {
    5.0
}

fn default_fail_threshold() -> u32 {
    20
}

fn default_reject_duration() -> u64 {
    5_000
}

fn default_queue_max_len() -> usize {
    100
}

fn default_queue_cleanup_interval() -> u64 {
    1_000
}

fn default_worker_interval() -> u64 {
    50
}

fn default_retry_interval() -> u64 {
    10
}

fn default_queue_item_ttl() -> u64 {
    10_000
}

fn default_token_wait_timeout() -> u64 {
    30_000
}

impl LimiterConfig {
    /// Check that every interval is usable by the background tasks.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("queue_cleanup_interval_ms", self.queue_cleanup_interval_ms),
            ("worker_interval_ms", self.worker_interval_ms),
            ("retry_interval_ms", self.retry_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(FloodgateError::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }

    pub fn reject_duration(&self) -> Duration {
        Duration::from_millis(self.reject_duration_ms)
    }

    pub fn queue_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.queue_cleanup_interval_ms)
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn queue_item_ttl(&self) -> Duration {
        Duration::from_millis(self.queue_item_ttl_ms)
    }

    pub fn token_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.token_wait_timeout_ms)
    }
}
