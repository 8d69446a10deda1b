//! State management for partition pipelines
//!
//! - [`PartitionCheckpoint`]: the next offset plus the operator state
//!   (dedup entries, open windows, watermark, user totals, stream clock)
//! - [`OffsetStore`]: atomic, monotonic persistence of checkpoints, with an
//!   in-memory and a file-backed implementation

pub mod checkpoint;
pub mod offset_store;

pub use checkpoint::{PartitionCheckpoint, PartitionState, CHECKPOINT_VERSION};
pub use offset_store::{FileOffsetStore, InMemoryOffsetStore, OffsetStore};
