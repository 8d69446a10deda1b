//! Reliable batch writer on top of a [`DocumentSink`]

use super::{DocumentSink, FailureKind, IndexKind, SinkDocument, WriteOutcome};
use crate::config::SinkConfig;
use crate::error::{SinkError, SinkResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Tally of one [`SinkWriter::write_all`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Documents confirmed written
    pub written: usize,
    /// Documents dropped after a permanent rejection
    pub dropped: usize,
    /// Retry attempts made across all chunks
    pub retries: u32,
}

/// Writes documents in bounded chunks, retrying only what failed transiently
#[derive(Clone)]
pub struct SinkWriter {
    sink: Arc<dyn DocumentSink>,
    config: SinkConfig,
}

impl std::fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkWriter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn DocumentSink>, config: SinkConfig) -> Self {
        Self { sink, config }
    }

    /// Write every document or fail.
    ///
    /// Documents sharing `(index, id)` are coalesced to the last one, in
    /// first-occurrence order. Permanently rejected documents are dropped and
    /// counted. An `Err` means some documents may not have been written and
    /// the batch must not be committed.
    pub async fn write_all(&self, documents: Vec<SinkDocument>) -> SinkResult<WriteReport> {
        let documents = coalesce(documents);
        let mut report = WriteReport::default();

        for chunk in documents.chunks(self.config.batch_size.max(1)) {
            self.write_chunk(chunk.to_vec(), &mut report).await?;
        }

        debug!(
            written = report.written,
            dropped = report.dropped,
            retries = report.retries,
            "sink batch complete"
        );
        Ok(report)
    }

    async fn write_chunk(&self, mut pending: Vec<SinkDocument>, report: &mut WriteReport) -> SinkResult<()> {
        let mut attempt: u32 = 0;

        loop {
            let last_error = match self.write_once(&pending).await {
                Ok(WriteOutcome::Success) => {
                    report.written += pending.len();
                    return Ok(());
                }
                Ok(WriteOutcome::Partial(failures)) => {
                    let mut retryable: HashSet<(IndexKind, String)> = HashSet::new();
                    let mut failed: HashSet<(IndexKind, String)> = HashSet::new();

                    for failure in failures {
                        failed.insert((failure.index, failure.id.clone()));
                        match failure.kind {
                            FailureKind::Transient => {
                                retryable.insert((failure.index, failure.id));
                            }
                            FailureKind::Permanent => {
                                warn!(
                                    index = %failure.index,
                                    id = %failure.id,
                                    reason = %failure.reason,
                                    "document permanently rejected, dropping"
                                );
                            }
                        }
                    }

                    let mut next = Vec::new();
                    for doc in pending {
                        let key = (doc.index, doc.id.clone());
                        if retryable.contains(&key) {
                            next.push(doc);
                        } else if failed.contains(&key) {
                            report.dropped += 1;
                        } else {
                            report.written += 1;
                        }
                    }
                    pending = next;

                    if pending.is_empty() {
                        return Ok(());
                    }
                    format!("{} documents failed transiently", pending.len())
                }
                Err(SinkError::Permanent(message)) => {
                    return Err(SinkError::Permanent(message));
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.config.max_retries {
                return Err(SinkError::RetriesExhausted {
                    attempts: attempt + 1,
                    pending: pending.len(),
                    last_error,
                });
            }

            let backoff = self.calculate_backoff(attempt);
            attempt += 1;
            report.retries += 1;
            warn!(
                "Sink write failed (attempt {}/{}), retrying {} documents in {:?}: {}",
                attempt,
                self.config.max_retries,
                pending.len(),
                backoff,
                last_error
            );
            sleep(backoff).await;
        }
    }

    async fn write_once(&self, documents: &[SinkDocument]) -> SinkResult<WriteOutcome> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.sink.write(documents)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Exponential backoff, capped at `max_backoff_ms`
    fn calculate_backoff(&self, retry_count: u32) -> Duration {
        let backoff_ms = self
            .config
            .base_backoff_ms
            .saturating_mul(2u64.pow(retry_count.min(10)));
        Duration::from_millis(backoff_ms.min(self.config.max_backoff_ms))
    }
}

fn coalesce(documents: Vec<SinkDocument>) -> Vec<SinkDocument> {
    let mut positions: HashMap<(IndexKind, String), usize> = HashMap::new();
    let mut out: Vec<SinkDocument> = Vec::with_capacity(documents.len());

    for doc in documents {
        let key = (doc.index, doc.id.clone());
        if let Some(&pos) = positions.get(&key) {
            out[pos] = doc;
        } else {
            positions.insert(key, out.len());
            out.push(doc);
        }
    }
    out
}
