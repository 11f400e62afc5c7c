/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Configuration for the task queue and worker pool.
//!
//! # Construction
//!
//! ```rust,ignore
//! let config = QueueConfig::builder()
//!     .worker_count(8)
//!     .max_retries(5)
//!     .build();
//! ```
//!
//! Configuration can also be read from TOML. Durations are written as whole
//! seconds (`*_secs`) or milliseconds (`*_ms`), and every key is optional:
//!
//! ```toml
//! worker_count = 8
//! task_timeout_secs = 900
//! initial_retry_delay_ms = 2000
//! key_prefix = "render:"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Scheduling class derived from a numeric priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    High,
    Normal,
    Low,
}

/// Configuration for the task manager and worker pool.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct QueueConfig {
    worker_count: usize,
    task_timeout: Duration,
    max_retries: i32,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
    backoff_factor: f64,
    retry_jitter_ratio: f64,
    heartbeat_interval: Duration,
    orphan_timeout: Duration,
    max_processing_time: Option<Duration>,
    priority_high_threshold: i32,
    priority_normal_threshold: i32,
    dlq_alert_threshold: i64,
    key_prefix: String,
    poll_interval: Duration,
    stats_window: Duration,
    stuck_status_threshold: Duration,
    enable_orphan_sweep: bool,
    sweep_interval: Duration,
}

impl QueueConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// Parses a TOML document, applying it on top of the defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let file: QueueConfigFile = toml::from_str(input)?;
        let config = file.apply(Self::builder()).build();
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.max_retries < 0 {
            return Err(ConfigError::Invalid(
                "max_retries must not be negative".to_string(),
            ));
        }
        if self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..1.0).contains(&self.retry_jitter_ratio) {
            return Err(ConfigError::Invalid(format!(
                "retry_jitter_ratio must be in [0, 1), got {}",
                self.retry_jitter_ratio
            )));
        }
        if self.initial_retry_delay > self.max_retry_delay {
            return Err(ConfigError::Invalid(
                "initial_retry_delay must not exceed max_retry_delay".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.orphan_timeout {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval ({:?}) must be shorter than orphan_timeout ({:?})",
                self.heartbeat_interval, self.orphan_timeout
            )));
        }
        if self.priority_high_threshold < self.priority_normal_threshold {
            return Err(ConfigError::Invalid(
                "priority_high_threshold must be >= priority_normal_threshold".to_string(),
            ));
        }
        Ok(())
    }

    /// Classifies a numeric priority against the configured thresholds.
    pub fn classify_priority(&self, priority: i32) -> PriorityClass {
        if priority >= self.priority_high_threshold {
            PriorityClass::High
        } else if priority >= self.priority_normal_threshold {
            PriorityClass::Normal
        } else {
            PriorityClass::Low
        }
    }

    /// Number of parallel workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Maximum time a single render may take.
    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Automatic retries before a task is marked failed.
    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Delay before the first retry.
    pub fn initial_retry_delay(&self) -> Duration {
        self.initial_retry_delay
    }

    /// Upper bound for any retry delay.
    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    /// Multiplier applied per retry.
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Fraction of a retry delay that may be shaved off at random.
    pub fn retry_jitter_ratio(&self) -> f64 {
        self.retry_jitter_ratio
    }

    /// How often a busy worker refreshes its heartbeat.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Heartbeat age after which a processing task counts as orphaned.
    pub fn orphan_timeout(&self) -> Duration {
        self.orphan_timeout
    }

    /// Absolute processing cap used by expired-task recovery.
    pub fn max_processing_time(&self) -> Option<Duration> {
        self.max_processing_time
    }

    pub fn priority_high_threshold(&self) -> i32 {
        self.priority_high_threshold
    }

    pub fn priority_normal_threshold(&self) -> i32 {
        self.priority_normal_threshold
    }

    /// Failures within the stats window that trigger a dead-letter alert.
    pub fn dlq_alert_threshold(&self) -> i64 {
        self.dlq_alert_threshold
    }

    /// Prefix for generated task identifiers.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Fallback poll interval for idle workers.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Window used for averages and failure counts in queue statistics.
    pub fn stats_window(&self) -> Duration {
        self.stats_window
    }

    /// Age after which an unfinished generation status counts as stuck.
    pub fn stuck_status_threshold(&self) -> Duration {
        self.stuck_status_threshold
    }

    /// Whether the worker pool periodically recovers orphaned tasks.
    pub fn enable_orphan_sweep(&self) -> bool {
        self.enable_orphan_sweep
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

/// Builder for [`QueueConfig`].
#[derive(Debug, Clone)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self {
            config: QueueConfig {
                worker_count: 4,
                task_timeout: Duration::from_secs(600),
                max_retries: 3,
                initial_retry_delay: Duration::from_secs(5),
                max_retry_delay: Duration::from_secs(300),
                backoff_factor: 2.0,
                retry_jitter_ratio: 0.1,
                heartbeat_interval: Duration::from_secs(10),
                orphan_timeout: Duration::from_secs(60),
                max_processing_time: None,
                priority_high_threshold: 10,
                priority_normal_threshold: 5,
                dlq_alert_threshold: 10,
                key_prefix: "task:".to_string(),
                poll_interval: Duration::from_millis(500),
                stats_window: Duration::from_secs(3600),
                stuck_status_threshold: Duration::from_secs(6 * 3600),
                enable_orphan_sweep: true,
                sweep_interval: Duration::from_secs(60),
            },
        }
    }
}

impl QueueConfigBuilder {
    pub fn worker_count(mut self, value: usize) -> Self {
        self.config.worker_count = value;
        self
    }

    pub fn task_timeout(mut self, value: Duration) -> Self {
        self.config.task_timeout = value;
        self
    }

    pub fn max_retries(mut self, value: i32) -> Self {
        self.config.max_retries = value;
        self
    }

    pub fn initial_retry_delay(mut self, value: Duration) -> Self {
        self.config.initial_retry_delay = value;
        self
    }

    pub fn max_retry_delay(mut self, value: Duration) -> Self {
        self.config.max_retry_delay = value;
        self
    }

    pub fn backoff_factor(mut self, value: f64) -> Self {
        self.config.backoff_factor = value;
        self
    }

    pub fn retry_jitter_ratio(mut self, value: f64) -> Self {
        self.config.retry_jitter_ratio = value;
        self
    }

    pub fn heartbeat_interval(mut self, value: Duration) -> Self {
        self.config.heartbeat_interval = value;
        self
    }

    pub fn orphan_timeout(mut self, value: Duration) -> Self {
        self.config.orphan_timeout = value;
        self
    }

    pub fn max_processing_time(mut self, value: Option<Duration>) -> Self {
        self.config.max_processing_time = value;
        self
    }

    pub fn priority_high_threshold(mut self, value: i32) -> Self {
        self.config.priority_high_threshold = value;
        self
    }

    pub fn priority_normal_threshold(mut self, value: i32) -> Self {
        self.config.priority_normal_threshold = value;
        self
    }

    pub fn dlq_alert_threshold(mut self, value: i64) -> Self {
        self.config.dlq_alert_threshold = value;
        self
    }

    pub fn key_prefix(mut self, value: impl Into<String>) -> Self {
        self.config.key_prefix = value.into();
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    pub fn stats_window(mut self, value: Duration) -> Self {
        self.config.stats_window = value;
        self
    }

    pub fn stuck_status_threshold(mut self, value: Duration) -> Self {
        self.config.stuck_status_threshold = value;
        self
    }

    pub fn enable_orphan_sweep(mut self, value: bool) -> Self {
        self.config.enable_orphan_sweep = value;
        self
    }

    pub fn sweep_interval(mut self, value: Duration) -> Self {
        self.config.sweep_interval = value;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> QueueConfig {
        self.config
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfigBuilder::default().build()
    }
}

/// On-disk shape of the configuration. Missing keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueueConfigFile {
    worker_count: Option<usize>,
    task_timeout_secs: Option<u64>,
    max_retries: Option<i32>,
    initial_retry_delay_ms: Option<u64>,
    max_retry_delay_ms: Option<u64>,
    backoff_factor: Option<f64>,
    retry_jitter_ratio: Option<f64>,
    heartbeat_interval_secs: Option<u64>,
    orphan_timeout_secs: Option<u64>,
    max_processing_time_secs: Option<u64>,
    priority_high_threshold: Option<i32>,
    priority_normal_threshold: Option<i32>,
    dlq_alert_threshold: Option<i64>,
    key_prefix: Option<String>,
    poll_interval_ms: Option<u64>,
    stats_window_secs: Option<u64>,
    stuck_status_threshold_secs: Option<u64>,
    enable_orphan_sweep: Option<bool>,
    sweep_interval_secs: Option<u64>,
}

impl QueueConfigFile {
    fn apply(self, mut builder: QueueConfigBuilder) -> QueueConfigBuilder {
        if let Some(v) = self.worker_count {
            builder = builder.worker_count(v);
        }
        if let Some(v) = self.task_timeout_secs {
            builder = builder.task_timeout(Duration::from_secs(v));
        }
        if let Some(v) = self.max_retries {
            builder = builder.max_retries(v);
        }
        if let Some(v) = self.initial_retry_delay_ms {
            builder = builder.initial_retry_delay(Duration::from_millis(v));
        }
        if let Some(v) = self.max_retry_delay_ms {
            builder = builder.max_retry_delay(Duration::from_millis(v));
        }
        if let Some(v) = self.backoff_factor {
            builder = builder.backoff_factor(v);
        }
        if let Some(v) = self.retry_jitter_ratio {
            builder = builder.retry_jitter_ratio(v);
        }
        if let Some(v) = self.heartbeat_interval_secs {
            builder = builder.heartbeat_interval(Duration::from_secs(v));
        }
        if let Some(v) = self.orphan_timeout_secs {
            builder = builder.orphan_timeout(Duration::from_secs(v));
        }
        if let Some(v) = self.max_processing_time_secs {
            builder = builder.max_processing_time(Some(Duration::from_secs(v)));
        }
        if let Some(v) = self.priority_high_threshold {
            builder = builder.priority_high_threshold(v);
        }
        if let Some(v) = self.priority_normal_threshold {
            builder = builder.priority_normal_threshold(v);
        }
        if let Some(v) = self.dlq_alert_threshold {
            builder = builder.dlq_alert_threshold(v);
        }
        if let Some(v) = self.key_prefix {
            builder = builder.key_prefix(v);
        }
        if let Some(v) = self.poll_interval_ms {
            builder = builder.poll_interval(Duration::from_millis(v));
        }
        if let Some(v) = self.stats_window_secs {
            builder = builder.stats_window(Duration::from_secs(v));
        }
        if let Some(v) = self.stuck_status_threshold_secs {
            builder = builder.stuck_status_threshold(Duration::from_secs(v));
        }
        if let Some(v) = self.enable_orphan_sweep {
            builder = builder.enable_orphan_sweep(v);
        }
        if let Some(v) = self.sweep_interval_secs {
            builder = builder.sweep_interval(Duration::from_secs(v));
        }
        builder
    }
}
