//! Sink abstraction for processed documents
//!
//! Every document is addressed by `(index, id)` and written as an idempotent
//! upsert, so replaying a batch converges to the same final sink state.
//!
//! - [`DocumentSink`]: one write call against the external store, reporting
//!   success, per-document failures, or a whole-request error
//! - [`SinkWriter`]: coalescing, chunking, timeouts and retry of the
//!   transiently failed subset
//! - [`MemorySink`]: last-write-wins in-memory store with failure injection
//! - [`ElasticsearchSink`]: `_bulk` API client

pub mod elasticsearch;
pub mod memory;
pub mod writer;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchSink, IndexNames};
pub use memory::MemorySink;
pub use writer::{SinkWriter, WriteReport};

use crate::error::SinkResult;
use crate::event::{Alert, EnrichedEvent, UserTotal};
use crate::window::WindowAggregate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Logical output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexKind {
    Transactions,
    WindowAggregates,
    Alerts,
    UserTotals,
}

impl IndexKind {
    pub const ALL: [IndexKind; 4] = [
        IndexKind::Transactions,
        IndexKind::WindowAggregates,
        IndexKind::Alerts,
        IndexKind::UserTotals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Transactions => "transactions",
            IndexKind::WindowAggregates => "window-aggregates",
            IndexKind::Alerts => "alerts",
            IndexKind::UserTotals => "user-totals",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document to upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkDocument {
    pub index: IndexKind,
    pub id: String,
    pub body: Value,
}

impl SinkDocument {
    pub fn new(index: IndexKind, id: impl Into<String>, body: Value) -> Self {
        Self {
            index,
            id: id.into(),
            body,
        }
    }

    /// Enriched transaction, keyed by `transactionId`
    pub fn transaction(enriched: &EnrichedEvent) -> Self {
        let event = &enriched.event;
        Self::new(
            IndexKind::Transactions,
            event.transaction_id.clone(),
            json!({
                "transactionId": event.transaction_id,
                "userId": event.user_id,
                "transactionAmount": event.amount,
                "ipAddress": event.ip_address,
                "timestamp": event.timestamp.to_rfc3339(),
                "location": enriched.location,
                "adjustedAmount": enriched.adjusted_amount,
            }),
        )
    }

    /// Alert, keyed by `transactionId`
    pub fn alert(alert: &Alert) -> Self {
        Self::new(
            IndexKind::Alerts,
            alert.transaction_id.clone(),
            json!({
                "transactionId": alert.transaction_id,
                "userId": alert.user_id,
                "amount": alert.amount,
                "reason": alert.reason,
                "location": alert.location,
                "timestamp": alert.timestamp.to_rfc3339(),
            }),
        )
    }

    /// Closed window, keyed by `userId#windowStart`
    pub fn window(aggregate: &WindowAggregate) -> Self {
        let bounds = &aggregate.key.bounds;
        let start = bounds
            .start()
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or_else(|| json!(bounds.start_ms));
        let end = bounds
            .end()
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or_else(|| json!(bounds.end_ms));

        Self::new(
            IndexKind::WindowAggregates,
            aggregate.key.document_id(),
            json!({
                "userId": aggregate.key.user_id,
                "windowStart": start,
                "windowEnd": end,
                "sum": aggregate.sum,
                "count": aggregate.count,
                "avgTransactionAmount": aggregate.avg(),
            }),
        )
    }

    /// Running user total, keyed by `userId`
    pub fn user_total(total: &UserTotal) -> Self {
        Self::new(
            IndexKind::UserTotals,
            total.user_id.clone(),
            json!({
                "userId": total.user_id,
                "totalTransactionAmount": total.total_transaction_amount,
                "transactionCount": total.transaction_count,
            }),
        )
    }

    pub fn key(&self) -> (IndexKind, &str) {
        (self.index, self.id.as_str())
    }
}

/// How a single document failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Rate limiting or server-side error; the document may be retried
    Transient,
    /// The document was rejected and will never succeed as is
    Permanent,
}

/// A document the sink did not accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub index: IndexKind,
    pub id: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Result of a sink call that reached the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every document was durably upserted
    Success,
    /// Documents not listed were upserted; the listed ones were not
    Partial(Vec<DocumentFailure>),
}

/// Idempotent upsert-by-id store
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Upsert a batch of documents.
    ///
    /// `Err` means no document can be assumed written.
    async fn write(&self, documents: &[SinkDocument]) -> SinkResult<WriteOutcome>;
}
