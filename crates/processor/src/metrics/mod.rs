//! Prometheus metrics for the stream processor
//!
//! Operator-visible counters for malformed records, late drops, sink retries
//! and halted partitions, plus an HTTP endpoint to scrape them.

mod pipeline;
mod registry;
mod server;

pub use pipeline::PipelineMetrics;
pub use registry::MetricsRegistry;
pub use server::{HealthStatus, MetricsServer, MetricsServerConfig, ReadinessStatus};

use thiserror::Error;

/// Errors that can occur in the metrics subsystem
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to start metrics server: {0}")]
    ServerStartError(String),

    #[error("Failed to bind to address {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    #[error("Metric encoding error: {0}")]
    EncodingError(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
