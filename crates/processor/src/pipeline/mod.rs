//! Partition pipelines
//!
//! - [`PartitionPipeline`]: the batch-then-commit loop for one partition
//! - [`PipelineRunner`]: one worker task per partition, with cooperative
//!   shutdown and a shutdown timeout
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use txn_processor::config::{PipelineConfig, RunnerConfig};
//! use txn_processor::enrichment::StaticLocationLookup;
//! use txn_processor::pipeline::{PipelineResources, PipelineRunner};
//! use txn_processor::sink::MemorySink;
//! use txn_processor::source::MemoryLog;
//! use txn_processor::state::InMemoryOffsetStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resources = PipelineResources {
//!     log: Arc::new(MemoryLog::with_partitions(&[0, 1])),
//!     store: Arc::new(InMemoryOffsetStore::new()),
//!     sink: Arc::new(MemorySink::new()),
//!     lookup: Arc::new(StaticLocationLookup::default()),
//!     metrics: None,
//! };
//!
//! let runner = PipelineRunner::new(
//!     PipelineConfig::default(),
//!     RunnerConfig::new(vec![0, 1]),
//!     resources,
//! );
//! let shutdown = runner.shutdown_token();
//! let workers = tokio::spawn(runner.run());
//!
//! shutdown.cancel();
//! let statuses = workers.await??;
//! # Ok(())
//! # }
//! ```

pub mod partition;
pub mod runner;
pub mod stats;

pub use partition::{BatchOutcome, PartitionPipeline, PipelineResources};
pub use runner::{PartitionStatus, PipelineRunner};
pub use stats::{BatchSummary, PartitionStats};
