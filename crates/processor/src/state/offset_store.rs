//! Offset store implementations
//!
//! The store owns each partition's cursor. Commits are atomic (a reader sees
//! either the previous checkpoint or the new one) and monotonic: a commit
//! with a lower offset than the stored one is rejected.

use super::checkpoint::PartitionCheckpoint;
use crate::error::{StateError, StateResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Durable per-partition checkpoint storage
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Last committed checkpoint, if any
    async fn load(&self, partition: i32) -> StateResult<Option<PartitionCheckpoint>>;

    /// Atomically replace the partition's checkpoint.
    ///
    /// Fails with [`StateError::OffsetRegression`] if the offset would move
    /// backwards.
    async fn commit(&self, checkpoint: &PartitionCheckpoint) -> StateResult<()>;

    /// Forget the partition's checkpoint
    async fn reset(&self, partition: i32) -> StateResult<()>;

    /// Next offset per committed partition
    async fn committed_offsets(&self) -> StateResult<HashMap<i32, i64>>;
}

fn check_monotonic(partition: i32, committed: i64, attempted: i64) -> StateResult<()> {
    if attempted < committed {
        return Err(StateError::OffsetRegression {
            partition,
            committed,
            attempted,
        });
    }
    Ok(())
}

/// In-memory offset store
///
/// Keeps every committed offset in order, and can be told to fail commits.
#[derive(Debug, Default)]
pub struct InMemoryOffsetStore {
    checkpoints: DashMap<i32, PartitionCheckpoint>,
    history: Mutex<Vec<(i32, i64)>>,
    failing: Mutex<Option<String>>,
}

impl InMemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following commit fail with a storage error
    pub fn fail_commits(&self, details: impl Into<String>) {
        *self.failing.lock() = Some(details.into());
    }

    /// Let commits succeed again
    pub fn clear_failures(&self) {
        *self.failing.lock() = None;
    }

    /// Offsets committed for `partition`, in commit order
    pub fn commit_history(&self, partition: i32) -> Vec<i64> {
        self.history
            .lock()
            .iter()
            .filter(|(p, _)| *p == partition)
            .map(|(_, offset)| *offset)
            .collect()
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn load(&self, partition: i32) -> StateResult<Option<PartitionCheckpoint>> {
        Ok(self.checkpoints.get(&partition).map(|c| c.value().clone()))
    }

    async fn commit(&self, checkpoint: &PartitionCheckpoint) -> StateResult<()> {
        if let Some(details) = self.failing.lock().clone() {
            return Err(StateError::StorageError {
                backend_type: "memory".to_string(),
                details,
            });
        }

        match self.checkpoints.entry(checkpoint.partition) {
            Entry::Occupied(mut entry) => {
                check_monotonic(
                    checkpoint.partition,
                    entry.get().next_offset,
                    checkpoint.next_offset,
                )?;
                entry.insert(checkpoint.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(checkpoint.clone());
            }
        }

        self.history
            .lock()
            .push((checkpoint.partition, checkpoint.next_offset));
        Ok(())
    }

    async fn reset(&self, partition: i32) -> StateResult<()> {
        self.checkpoints.remove(&partition);
        Ok(())
    }

    async fn committed_offsets(&self) -> StateResult<HashMap<i32, i64>> {
        Ok(self
            .checkpoints
            .iter()
            .map(|entry| (*entry.key(), entry.value().next_offset))
            .collect())
    }
}

/// File-backed offset store
///
/// One JSON file per partition (`partition-<id>.json`). A commit writes a
/// temporary file, fsyncs it and renames it over the previous checkpoint.
#[derive(Debug)]
pub struct FileOffsetStore {
    dir: PathBuf,
    /// Last known committed offset per partition
    committed: DashMap<i32, i64>,
}

impl FileOffsetStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl AsRef<Path>) -> StateResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error(format!("failed to create {}: {}", dir.display(), e)))?;

        info!(dir = %dir.display(), "file offset store opened");
        Ok(Self {
            dir,
            committed: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, partition: i32) -> PathBuf {
        self.dir.join(format!("partition-{}.json", partition))
    }

    fn temp_path(&self, partition: i32) -> PathBuf {
        self.dir.join(format!("partition-{}.json.tmp", partition))
    }

    async fn read(&self, partition: i32) -> StateResult<Option<PartitionCheckpoint>> {
        let path = self.path(partition);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(storage_error(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let checkpoint: PartitionCheckpoint =
            serde_json::from_slice(&bytes).map_err(|e| StateError::DeserializationFailed {
                key: path.display().to_string(),
                reason: e.to_string(),
            })?;
        self.committed.insert(partition, checkpoint.next_offset);
        Ok(Some(checkpoint))
    }

    async fn committed_offset(&self, partition: i32) -> StateResult<Option<i64>> {
        if let Some(offset) = self.committed.get(&partition) {
            return Ok(Some(*offset));
        }
        Ok(self.read(partition).await?.map(|c| c.next_offset))
    }
}

fn storage_error(details: String) -> StateError {
    StateError::StorageError {
        backend_type: "file".to_string(),
        details,
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn load(&self, partition: i32) -> StateResult<Option<PartitionCheckpoint>> {
        self.read(partition).await
    }

    async fn commit(&self, checkpoint: &PartitionCheckpoint) -> StateResult<()> {
        let partition = checkpoint.partition;
        if let Some(committed) = self.committed_offset(partition).await? {
            check_monotonic(partition, committed, checkpoint.next_offset)?;
        }

        let bytes = serde_json::to_vec(checkpoint).map_err(|e| StateError::SerializationFailed {
            key: format!("partition-{}", partition),
            reason: e.to_string(),
        })?;

        let temp = self.temp_path(partition);
        let path = self.path(partition);

        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| storage_error(format!("failed to create {}: {}", temp.display(), e)))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| storage_error(format!("failed to write {}: {}", temp.display(), e)))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error(format!("failed to sync {}: {}", temp.display(), e)))?;
        drop(file);

        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|e| storage_error(format!("failed to rename {}: {}", temp.display(), e)))?;

        #[cfg(unix)]
        {
            let dir = tokio::fs::File::open(&self.dir)
                .await
                .map_err(|e| storage_error(format!("failed to open {}: {}", self.dir.display(), e)))?;
            dir.sync_all()
                .await
                .map_err(|e| storage_error(format!("failed to sync {}: {}", self.dir.display(), e)))?;
        }

        self.committed.insert(partition, checkpoint.next_offset);
        debug!(partition, next_offset = checkpoint.next_offset, "checkpoint committed");
        Ok(())
    }

    async fn reset(&self, partition: i32) -> StateResult<()> {
        let path = self.path(partition);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(storage_error(format!(
                    "failed to remove {}: {}",
                    path.display(),
                    e
                )))
            }
        }
        self.committed.remove(&partition);
        info!(partition, "checkpoint reset");
        Ok(())
    }

    async fn committed_offsets(&self) -> StateResult<HashMap<i32, i64>> {
        let mut offsets = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| storage_error(format!("failed to list {}: {}", self.dir.display(), e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(partition) = name
                .to_str()
                .and_then(|n| n.strip_prefix("partition-"))
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<i32>().ok())
            else {
                continue;
            };
            if let Some(checkpoint) = self.read(partition).await? {
                offsets.insert(partition, checkpoint.next_offset);
            }
        }
        Ok(offsets)
    }
}
