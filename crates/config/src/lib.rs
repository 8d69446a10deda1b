//! Configuration management for the transaction stream processor
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! environment variables prefixed with `TXN_STREAM_` (nested keys separated
//! by `__`, e.g. `TXN_STREAM_PIPELINE__ALERT_THRESHOLD=5000`).

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use txn_processor::config::{PipelineConfig, RunnerConfig, StartingOffset};
use txn_processor::metrics::MetricsServerConfig;
use txn_processor::sink::ElasticsearchConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TXN_STREAM_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub sink: ElasticsearchConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// How long workers get to finish their in-flight batch on shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            pipeline: PipelineConfig::default(),
            sink: ElasticsearchConfig::default(),
            checkpoint: CheckpointConfig::default(),
            observability: ObservabilityConfig::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::figment(config_path)
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// The layered provider chain used by [`load`](Self::load)
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.pipeline
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.sink
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.runner_config()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.checkpoint.dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "checkpoint.dir must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Pipeline settings with the source's batching applied
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut pipeline = self.pipeline.clone();
        if let Some(max_batch) = self.source.max_batch {
            pipeline.batch.max_batch = max_batch;
        }
        if let Some(poll_timeout_ms) = self.source.poll_timeout_ms {
            pipeline.batch.poll_timeout_ms = poll_timeout_ms;
        }
        pipeline
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            partitions: self.source.partitions.clone(),
            starting_offset: self.source.starting_offset,
            shutdown_timeout_ms: self.shutdown_timeout_ms,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Broker and partition selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Comma-separated bootstrap servers
    #[serde(default = "default_brokers")]
    pub brokers: String,

    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group id; offsets are not committed to the broker
    #[serde(default = "default_group_id")]
    pub group_id: String,

    #[serde(default = "default_partitions")]
    pub partitions: Vec<i32>,

    #[serde(default)]
    pub starting_offset: StartingOffset,

    /// Overrides `pipeline.batch.max_batch`
    #[serde(default)]
    pub max_batch: Option<usize>,

    /// Overrides `pipeline.batch.poll_timeout_ms`
    #[serde(default)]
    pub poll_timeout_ms: Option<u64>,
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    "mongo-changestreams".to_string()
}

fn default_group_id() -> String {
    "txn-stream".to_string()
}

fn default_partitions() -> Vec<i32> {
    vec![0]
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            group_id: default_group_id(),
            partitions: default_partitions(),
            starting_offset: StartingOffset::default(),
            max_batch: None,
            poll_timeout_ms: None,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.brokers.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "source.brokers must not be empty".to_string(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "source.topic must not be empty".to_string(),
            ));
        }
        if self.max_batch == Some(0) {
            return Err(ConfigError::ValidationError(
                "source.max_batch must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Offset store location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./checkpoints")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Metrics endpoint; disabled when absent
    #[serde(default = "default_metrics")]
    pub metrics: Option<MetricsServerConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> Option<MetricsServerConfig> {
    Some(MetricsServerConfig::default())
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics: default_metrics(),
        }
    }
}
