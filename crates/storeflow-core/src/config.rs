//! Engine configuration (`storeflow.toml` or JSON).
//!
//! Every field has a default, so an empty file is a valid configuration.
//! The camelCase spellings used by the job-runner scripts are accepted as
//! aliases.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on the concurrency degree of any batch.
    #[serde(alias = "maxConcurrentStores")]
    pub max_concurrent_stores: usize,
    /// Size of each worker's processor slot pool.
    #[serde(
        alias = "maxProcessorsPerWorker",
        alias = "maxBrowsersPerWorker",
        alias = "max_browsers_per_worker"
    )]
    pub max_processors_per_worker: usize,
    /// Processor calls running longer than this are abandoned. 0 disables.
    #[serde(alias = "queueTimeout")]
    pub queue_timeout_ms: u64,
    /// Retries after the first attempt before a job is failed for good.
    #[serde(alias = "retryAttempts")]
    pub retry_attempts: u32,
    #[serde(alias = "resourceLimits")]
    pub resource_limits: ResourceLimits,
    /// Log a progress line every `progress_interval_ms`.
    #[serde(alias = "debugMode")]
    pub debug_mode: bool,
    pub monitor_interval_ms: u64,
    /// Resource samples kept for reporting.
    pub history_limit: usize,
    /// A slot is torn down after this many uses.
    pub recycle_after_uses: u32,
    /// Fraction of idle workers retired under memory pressure.
    pub scale_down_fraction: f64,
    /// Backoff between polls of an empty queue.
    pub idle_poll_ms: u64,
    pub progress_interval_ms: u64,
    pub retirement: RetirementPolicy,
    pub strategy: StrategyThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_stores: 10,
            max_processors_per_worker: 2,
            queue_timeout_ms: 300_000,
            retry_attempts: 3,
            resource_limits: ResourceLimits::default(),
            debug_mode: false,
            monitor_interval_ms: 5_000,
            history_limit: 120,
            recycle_after_uses: 20,
            scale_down_fraction: 0.2,
            idle_poll_ms: 100,
            progress_interval_ms: 10_000,
            retirement: RetirementPolicy::default(),
            strategy: StrategyThresholds::default(),
        }
    }
}

/// Resource ceilings. Exceeding the memory ceiling throttles the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    #[serde(alias = "maxMemoryMB", alias = "maxMemoryMb")]
    pub max_memory_mb: f64,
    #[serde(alias = "maxCpuPercent")]
    pub max_cpu_percent: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 2048.0,
            max_cpu_percent: 80.0,
        }
    }
}

/// Which idle workers may be retired during resource optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetirementPolicy {
    /// Idle and holding no checked-out slot.
    #[default]
    NoCheckedOutSlots,
    /// Idle and holding no slot at all, warm or checked out.
    NoPooledSlots,
    /// Workers are never retired; only idle slots are trimmed.
    Never,
}

/// Batch-size tiers used by the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyThresholds {
    /// Batches up to this size run on a single worker.
    pub sequential_max_jobs: usize,
    pub small_batch_max_jobs: usize,
    pub small_batch_degree: usize,
    pub medium_batch_max_jobs: usize,
    pub medium_batch_degree: usize,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            sequential_max_jobs: 5,
            small_batch_max_jobs: 20,
            small_batch_degree: 5,
            medium_batch_max_jobs: 50,
            medium_batch_degree: 10,
        }
    }
}

impl EngineConfig {
    /// Load from a file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            _ => Self::from_toml_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_stores == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_stores must be at least 1".into(),
            ));
        }
        if self.max_processors_per_worker == 0 {
            return Err(ConfigError::Invalid(
                "max_processors_per_worker must be at least 1".into(),
            ));
        }
        if self.recycle_after_uses == 0 {
            return Err(ConfigError::Invalid(
                "recycle_after_uses must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.scale_down_fraction) {
            return Err(ConfigError::Invalid(format!(
                "scale_down_fraction must be within 0..=1, got {}",
                self.scale_down_fraction
            )));
        }
        if self.resource_limits.max_memory_mb <= 0.0 || self.resource_limits.max_cpu_percent <= 0.0
        {
            return Err(ConfigError::Invalid(
                "resource limits must be positive".into(),
            ));
        }
        if self.monitor_interval_ms == 0 || self.progress_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor and progress intervals must be non-zero".into(),
            ));
        }
        let s = &self.strategy;
        if s.sequential_max_jobs > s.small_batch_max_jobs
            || s.small_batch_max_jobs > s.medium_batch_max_jobs
        {
            return Err(ConfigError::Invalid(
                "strategy thresholds must be non-decreasing".into(),
            ));
        }
        Ok(())
    }

    pub fn queue_timeout(&self) -> Option<Duration> {
        (self.queue_timeout_ms > 0).then(|| Duration::from_millis(self.queue_timeout_ms))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
