//! In-memory document sink
//!
//! Last write wins per `(index, id)`. Failures can be injected to exercise
//! retry and poison-pill handling.

use super::{DocumentFailure, DocumentSink, FailureKind, IndexKind, SinkDocument, WriteOutcome};
use crate::error::{SinkError, SinkResult};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct FailurePlan {
    /// Whole-call errors returned by the next write calls, in order
    call_errors: VecDeque<SinkError>,
    /// Per-document failures: kind and how many more calls they fail
    documents: HashMap<(IndexKind, String), (FailureKind, u32)>,
}

/// Last-write-wins document store
#[derive(Debug, Default)]
pub struct MemorySink {
    documents: DashMap<(IndexKind, String), Value>,
    plan: Mutex<FailurePlan>,
    calls: Mutex<Vec<Vec<(IndexKind, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next write call as a whole
    pub fn fail_next_call(&self, error: SinkError) {
        self.plan.lock().call_errors.push_back(error);
    }

    /// Report `id` as failed for the next `times` calls that include it
    pub fn fail_document(&self, index: IndexKind, id: impl Into<String>, kind: FailureKind, times: u32) {
        self.plan
            .lock()
            .documents
            .insert((index, id.into()), (kind, times));
    }

    pub fn get(&self, index: IndexKind, id: &str) -> Option<Value> {
        self.documents
            .get(&(index, id.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn count(&self, index: IndexKind) -> usize {
        self.documents
            .iter()
            .filter(|entry| entry.key().0 == index)
            .count()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// All stored documents ordered by index then id
    pub fn snapshot(&self) -> Vec<SinkDocument> {
        let mut docs: Vec<SinkDocument> = self
            .documents
            .iter()
            .map(|entry| SinkDocument::new(entry.key().0, entry.key().1.clone(), entry.value().clone()))
            .collect();
        docs.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));
        docs
    }

    /// Document keys of every write call received, including failed ones
    pub fn calls(&self) -> Vec<Vec<(IndexKind, String)>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn write(&self, documents: &[SinkDocument]) -> SinkResult<WriteOutcome> {
        self.calls
            .lock()
            .push(documents.iter().map(|d| (d.index, d.id.clone())).collect());

        let mut failures = Vec::new();
        {
            let mut plan = self.plan.lock();
            if let Some(error) = plan.call_errors.pop_front() {
                return Err(error);
            }

            for doc in documents {
                let key = (doc.index, doc.id.clone());
                let Some((kind, remaining)) = plan.documents.get_mut(&key) else {
                    continue;
                };
                if *remaining == 0 {
                    continue;
                }
                *remaining -= 1;
                failures.push(DocumentFailure {
                    index: doc.index,
                    id: doc.id.clone(),
                    kind: *kind,
                    reason: format!("injected {:?} failure", kind),
                });
            }
        }

        for doc in documents {
            let failed = failures
                .iter()
                .any(|f| f.index == doc.index && f.id == doc.id);
            if !failed {
                self.documents
                    .insert((doc.index, doc.id.clone()), doc.body.clone());
            }
        }

        if failures.is_empty() {
            Ok(WriteOutcome::Success)
        } else {
            Ok(WriteOutcome::Partial(failures))
        }
    }
}
