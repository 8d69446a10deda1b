//! Transaction stream processor
//!
//! Consumes transaction events from a partitioned log, deduplicates and
//! enriches them, maintains per-user tumbling-window and running aggregates,
//! flags high-value transactions and upserts everything into a document
//! store. Offsets are committed together with the operator state only after
//! the sink has confirmed a batch, giving at-least-once delivery with
//! idempotent effect.

pub mod classify;
pub mod config;
pub mod decoder;
pub mod dedup;
pub mod enrichment;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod state;
pub mod totals;
pub mod watermark;
pub mod window;

pub use classify::{AlertClassifier, AmountFilter};
pub use config::{PipelineConfig, RunnerConfig, StartingOffset};
pub use decoder::EventDecoder;
pub use dedup::{DedupEntry, DedupFilter, DedupStats};
pub use enrichment::{
    Enricher, FnLocationLookup, LocationLookup, StaticLocationLookup, UNKNOWN_LOCATION,
};
pub use error::{
    DecodeError, LookupError, ProcessorError, Result as ProcessorResult, SinkError, SourceError,
    StateError,
};
pub use event::{Alert, EnrichedEvent, TransactionEvent, UserTotal};
pub use metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig, PipelineMetrics};
pub use pipeline::{
    BatchOutcome, BatchSummary, PartitionPipeline, PartitionStats, PartitionStatus,
    PipelineResources, PipelineRunner,
};
pub use sink::{
    DocumentSink, ElasticsearchConfig, ElasticsearchSink, IndexKind, MemorySink, SinkDocument,
    SinkWriter, WriteOutcome,
};
pub use source::{MemoryLog, PartitionLog, SourceRecord};
pub use state::{FileOffsetStore, InMemoryOffsetStore, OffsetStore, PartitionCheckpoint};
pub use totals::UserTotals;
pub use watermark::{Watermark, WatermarkTracker};
pub use window::{WindowAggregate, WindowKey, WindowedAggregator};
