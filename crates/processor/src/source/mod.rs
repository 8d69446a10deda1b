//! Partitioned, offset-addressed input logs
//!
//! The log has no acknowledgment of its own: the pipeline asks for records
//! from an explicit offset and tracks progress in its offset store.

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaPartitionLog, KafkaSourceConfig};

use crate::error::{SourceError, SourceResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// A raw record read from a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Read access to a partitioned log
#[async_trait]
pub trait PartitionLog: Send + Sync {
    /// Up to `max_batch` records starting at `from_offset`, in offset order.
    ///
    /// Waits at most `timeout` for the first record; an empty result means
    /// nothing arrived in time.
    async fn poll(
        &self,
        partition: i32,
        from_offset: i64,
        max_batch: usize,
        timeout: Duration,
    ) -> SourceResult<Vec<SourceRecord>>;

    /// Oldest offset still readable
    async fn earliest_offset(&self, partition: i32) -> SourceResult<i64>;

    /// Offset the next appended record will get
    async fn latest_offset(&self, partition: i32) -> SourceResult<i64>;
}

/// In-memory log; offsets start at zero in every partition
#[derive(Debug, Default)]
pub struct MemoryLog {
    partitions: RwLock<HashMap<i32, Vec<Vec<u8>>>>,
    appended: Notify,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partitions(partitions: &[i32]) -> Self {
        let log = Self::new();
        {
            let mut map = log.partitions.write();
            for p in partitions {
                map.entry(*p).or_default();
            }
        }
        log
    }

    /// Append a payload, creating the partition if needed, and return its offset
    pub fn append(&self, partition: i32, payload: impl Into<Vec<u8>>) -> i64 {
        let offset = {
            let mut map = self.partitions.write();
            let records = map.entry(partition).or_default();
            records.push(payload.into());
            records.len() as i64 - 1
        };
        self.appended.notify_waiters();
        offset
    }

    /// Append every non-blank line of a JSON-lines file to `partition`
    pub async fn load_jsonl(&self, partition: i32, path: impl AsRef<Path>) -> std::io::Result<usize> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let mut count = 0;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            self.append(partition, line.as_bytes().to_vec());
            count += 1;
        }
        debug!(partition, count, path = %path.as_ref().display(), "loaded records");
        Ok(count)
    }

    fn read(&self, partition: i32, from_offset: i64, max_batch: usize) -> SourceResult<Vec<SourceRecord>> {
        let map = self.partitions.read();
        let records = map
            .get(&partition)
            .ok_or(SourceError::PartitionNotFound { partition })?;

        let start = usize::try_from(from_offset.max(0)).unwrap_or(usize::MAX);
        Ok(records
            .iter()
            .enumerate()
            .skip(start)
            .take(max_batch)
            .map(|(offset, payload)| SourceRecord {
                partition,
                offset: offset as i64,
                payload: payload.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl PartitionLog for MemoryLog {
    async fn poll(
        &self,
        partition: i32,
        from_offset: i64,
        max_batch: usize,
        timeout: Duration,
    ) -> SourceResult<Vec<SourceRecord>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let records = self.read(partition, from_offset, max_batch)?;
            if !records.is_empty() {
                return Ok(records);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn earliest_offset(&self, partition: i32) -> SourceResult<i64> {
        if self.partitions.read().contains_key(&partition) {
            Ok(0)
        } else {
            Err(SourceError::PartitionNotFound { partition })
        }
    }

    async fn latest_offset(&self, partition: i32) -> SourceResult<i64> {
        self.partitions
            .read()
            .get(&partition)
            .map(|records| records.len() as i64)
            .ok_or(SourceError::PartitionNotFound { partition })
    }
}
