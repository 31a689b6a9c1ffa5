//! Job subsystem configuration.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracklift_resilience::CircuitBreakerConfig;

/// Configuration for the job execution core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Retry policy configuration.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Default circuit breaker configuration.
    #[serde(default)]
    pub breaker: BreakerConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Polling interval in milliseconds when the queue is idle.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Shutdown drain timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl WorkerConfig {
    /// Returns poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
        .max(4)
}

fn default_poll_interval() -> u64 {
    100
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Default retry ceiling for submitted jobs.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            base_delay_ms: config.base_delay_ms,
            multiplier: config.multiplier,
            max_delay_ms: config.max_delay_ms,
            max_retries: config.max_retries,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    3_600_000 // 1 hour
}

fn default_multiplier() -> f64 {
    2.0
}

/// Circuit breaker defaults applied to services without their own
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before opening.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,

    /// Consecutive half-open successes before closing.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u64,

    /// Open-state timeout in seconds.
    #[serde(default = "default_breaker_timeout")]
    pub timeout_secs: u64,

    /// Trial calls admitted while half-open.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_secs: default_breaker_timeout(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(config: &BreakerConfig) -> Self {
        CircuitBreakerConfig {
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            timeout: Duration::from_secs(config.timeout_secs),
            half_open_max_calls: config.half_open_max_calls,
        }
    }
}

fn default_failure_threshold() -> u64 {
    5
}

fn default_success_threshold() -> u64 {
    3
}

fn default_breaker_timeout() -> u64 {
    30
}

fn default_half_open_max_calls() -> u64 {
    3
}
