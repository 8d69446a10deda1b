//! Configuration types for the stream processor
//!
//! Thresholds, window geometry, dedup horizon, lookup and sink budgets for a
//! single pipeline, plus the runner settings shared by all partitions.

use crate::error::{ProcessorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-partition pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Events with `amount <= filter_threshold` are discarded
    #[serde(default = "default_filter_threshold")]
    pub filter_threshold: f64,

    /// Multiplier applied to the amount to produce `adjustedAmount`
    #[serde(default = "default_surcharge_factor")]
    pub surcharge_factor: f64,

    /// Events with `amount > alert_threshold` produce an alert
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    /// Window configuration
    #[serde(default)]
    pub window: WindowConfig,

    /// Deduplication configuration
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Enrichment configuration
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Sink writer configuration
    #[serde(default)]
    pub sink: SinkConfig,

    /// Micro-batch configuration
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter_threshold: default_filter_threshold(),
            surcharge_factor: default_surcharge_factor(),
            alert_threshold: default_alert_threshold(),
            window: WindowConfig::default(),
            dedup: DedupConfig::default(),
            enrichment: EnrichmentConfig::default(),
            sink: SinkConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.filter_threshold.is_finite() || self.filter_threshold < 0.0 {
            return Err(ProcessorError::config(
                "filter_threshold must be a finite, non-negative number",
            ));
        }

        if !self.surcharge_factor.is_finite() || self.surcharge_factor <= 0.0 {
            return Err(ProcessorError::config(
                "surcharge_factor must be a finite, positive number",
            ));
        }

        if !self.alert_threshold.is_finite() || self.alert_threshold < 0.0 {
            return Err(ProcessorError::config(
                "alert_threshold must be a finite, non-negative number",
            ));
        }

        self.window.validate()?;
        self.dedup.validate()?;
        self.enrichment.validate()?;
        self.sink.validate()?;
        self.batch.validate()?;
        Ok(())
    }
}

/// Tumbling window configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window size in milliseconds
    #[serde(default = "default_window_size_ms")]
    pub size_ms: u64,

    /// How far behind the maximum observed event time the watermark trails
    #[serde(default = "default_allowed_lateness_ms")]
    pub allowed_lateness_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size_ms: default_window_size_ms(),
            allowed_lateness_ms: default_allowed_lateness_ms(),
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size_ms == 0 {
            return Err(ProcessorError::config("window size_ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn size(&self) -> Duration {
        Duration::from_millis(self.size_ms)
    }

    pub fn allowed_lateness(&self) -> Duration {
        Duration::from_millis(self.allowed_lateness_ms)
    }
}

/// Deduplication configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How long a transaction id is remembered, measured in event time
    #[serde(default = "default_dedup_retention_ms")]
    pub retention_ms: u64,

    /// Upper bound on remembered ids; oldest are evicted first.
    ///
    /// Every remembered id is part of the partition checkpoint, which is
    /// serialized and flushed on each batch commit. Commit cost therefore
    /// grows with this cap (roughly 60 bytes of JSON per id, so the default
    /// allows checkpoints of about 60 MB). Lower it, or raise `max_batch`, when
    /// commits dominate batch latency.
    #[serde(default = "default_dedup_max_entries")]
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention_ms: default_dedup_retention_ms(),
            max_entries: default_dedup_max_entries(),
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retention_ms == 0 {
            return Err(ProcessorError::config(
                "dedup retention_ms must be greater than 0",
            ));
        }
        if self.max_entries == 0 {
            return Err(ProcessorError::config(
                "dedup max_entries must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

/// Enrichment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Deadline for a single location lookup
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

impl EnrichmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lookup_timeout_ms == 0 {
            return Err(ProcessorError::config(
                "lookup_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// Sink writer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Maximum documents per sink request
    #[serde(default = "default_sink_batch_size")]
    pub batch_size: usize,

    /// Retries for transiently failed documents before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry backoff
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound on retry backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Deadline for a single sink request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: default_sink_batch_size(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ProcessorError::config(
                "sink batch_size must be greater than 0",
            ));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ProcessorError::config(
                "sink base_backoff_ms must not exceed max_backoff_ms",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ProcessorError::config(
                "sink request_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Micro-batch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum records read per batch
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// How long a poll waits for the first record
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Pause before replaying a batch whose sink write failed transiently
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            poll_timeout_ms: default_poll_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch == 0 {
            return Err(ProcessorError::config("max_batch must be greater than 0"));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Where a partition starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartingOffset {
    /// Discard any checkpoint and start at the log's earliest offset
    Earliest,
    /// Discard any checkpoint and start at the log's end
    Latest,
    /// Continue from the committed checkpoint, or earliest if none exists
    Resume,
}

impl Default for StartingOffset {
    fn default() -> Self {
        StartingOffset::Resume
    }
}

/// Settings for running all partitions of a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Partitions to process, one worker each
    pub partitions: Vec<i32>,

    #[serde(default)]
    pub starting_offset: StartingOffset,

    /// How long in-flight batches get to finish after shutdown is requested
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl RunnerConfig {
    pub fn new(partitions: Vec<i32>) -> Self {
        Self {
            partitions,
            starting_offset: StartingOffset::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions.is_empty() {
            return Err(ProcessorError::config("at least one partition is required"));
        }
        let mut seen = std::collections::HashSet::new();
        for p in &self.partitions {
            if *p < 0 {
                return Err(ProcessorError::config(format!(
                    "partition id must be non-negative, got {}",
                    p
                )));
            }
            if !seen.insert(*p) {
                return Err(ProcessorError::config(format!(
                    "partition {} is listed more than once",
                    p
                )));
            }
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

// Default value functions
fn default_filter_threshold() -> f64 {
    1000.0
}

fn default_surcharge_factor() -> f64 {
    1.10
}

fn default_alert_threshold() -> f64 {
    10000.0
}

fn default_window_size_ms() -> u64 {
    300_000
}

fn default_allowed_lateness_ms() -> u64 {
    60_000
}

fn default_dedup_retention_ms() -> u64 {
    900_000
}

fn default_dedup_max_entries() -> usize {
    1_000_000
}

fn default_lookup_timeout_ms() -> u64 {
    200
}

fn default_sink_batch_size() -> usize {
    500
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_batch() -> usize {
    1000
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}
