//! Per-partition checkpoint record
//!
//! A checkpoint couples the next offset to read with the operator state that
//! results from processing everything before it. Both are committed together
//! so a restart never pairs an offset with state from a different point.

use crate::dedup::DedupEntry;
use crate::event::UserTotal;
use crate::window::WindowSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Operator state of one partition pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionState {
    /// Maximum event time accepted so far; drives the dedup horizon
    pub stream_clock_ms: Option<i64>,
    pub dedup: Vec<DedupEntry>,
    pub windows: WindowSnapshot,
    pub user_totals: Vec<UserTotal>,
}

/// Committed progress of one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionCheckpoint {
    pub version: u32,
    pub partition: i32,
    /// First offset not yet processed
    pub next_offset: i64,
    pub committed_at: DateTime<Utc>,
    pub state: PartitionState,
}

impl PartitionCheckpoint {
    pub fn new(partition: i32, next_offset: i64, state: PartitionState) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            partition,
            next_offset,
            committed_at: Utc::now(),
            state,
        }
    }
}
