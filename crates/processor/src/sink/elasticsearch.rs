//! Elasticsearch sink using the `_bulk` API
//!
//! Each document becomes an `index` action carrying an explicit `_id`, which
//! makes the write an upsert. Request-level and item-level statuses are
//! classified the same way: 429 and 5xx are transient, other 4xx permanent.

use super::{DocumentFailure, DocumentSink, FailureKind, IndexKind, SinkDocument, WriteOutcome};
use crate::error::{ProcessorError, Result, SinkError, SinkResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Target index name per logical output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexNames {
    #[serde(default = "default_transactions_index")]
    pub transactions: String,
    #[serde(default = "default_window_aggregates_index")]
    pub window_aggregates: String,
    #[serde(default = "default_alerts_index")]
    pub alerts: String,
    #[serde(default = "default_user_totals_index")]
    pub user_totals: String,
}

impl Default for IndexNames {
    fn default() -> Self {
        Self {
            transactions: default_transactions_index(),
            window_aggregates: default_window_aggregates_index(),
            alerts: default_alerts_index(),
            user_totals: default_user_totals_index(),
        }
    }
}

impl IndexNames {
    pub fn name(&self, kind: IndexKind) -> &str {
        match kind {
            IndexKind::Transactions => &self.transactions,
            IndexKind::WindowAggregates => &self.window_aggregates,
            IndexKind::Alerts => &self.alerts,
            IndexKind::UserTotals => &self.user_totals,
        }
    }
}

/// Elasticsearch connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Base URL, e.g. `http://localhost:9200`
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default)]
    pub indices: IndexNames,

    /// HTTP request timeout (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            indices: IndexNames::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ElasticsearchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ProcessorError::config(format!(
                "elasticsearch url must start with http:// or https://, got '{}'",
                self.url
            )));
        }
        for kind in IndexKind::ALL {
            if self.indices.name(kind).is_empty() {
                return Err(ProcessorError::config(format!(
                    "index name for {} must not be empty",
                    kind
                )));
            }
        }
        Ok(())
    }
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_transactions_index() -> String {
    IndexKind::Transactions.as_str().to_string()
}

fn default_window_aggregates_index() -> String {
    IndexKind::WindowAggregates.as_str().to_string()
}

fn default_alerts_index() -> String {
    IndexKind::Alerts.as_str().to_string()
}

fn default_user_totals_index() -> String {
    IndexKind::UserTotals.as_str().to_string()
}

/// `_bulk` API client
#[derive(Debug, Clone)]
pub struct ElasticsearchSink {
    client: reqwest::Client,
    bulk_url: String,
    indices: IndexNames,
    request_timeout_ms: u64,
}

impl ElasticsearchSink {
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent("txn-stream/0.1")
            .build()
            .map_err(|e| ProcessorError::config(format!("failed to create HTTP client: {}", e)))?;

        info!("Initialized Elasticsearch sink for: {}", config.url);

        Ok(Self {
            client,
            bulk_url: format!("{}/_bulk", config.url.trim_end_matches('/')),
            indices: config.indices,
            request_timeout_ms: config.request_timeout_ms,
        })
    }
}

#[async_trait]
impl DocumentSink for ElasticsearchSink {
    async fn write(&self, documents: &[SinkDocument]) -> SinkResult<WriteOutcome> {
        if documents.is_empty() {
            return Ok(WriteOutcome::Success);
        }

        let body = build_bulk_body(documents, &self.indices);
        debug!(documents = documents.len(), bytes = body.len(), "sending bulk request");

        let response = self
            .client
            .post(&self.bulk_url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout {
                        timeout_ms: self.request_timeout_ms,
                    }
                } else {
                    SinkError::Transient(format!("bulk request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("Elasticsearch bulk error ({}): {}", status, error_text);
            return match classify_status(status) {
                FailureKind::Transient => Err(SinkError::Transient(message)),
                FailureKind::Permanent => Err(SinkError::Permanent(message)),
            };
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| SinkError::Transient(format!("unreadable bulk response: {}", e)))?;

        let outcome = parse_bulk_response(documents, &value)?;
        if let WriteOutcome::Partial(failures) = &outcome {
            warn!(failed = failures.len(), total = documents.len(), "bulk request partially failed");
        }
        Ok(outcome)
    }
}

fn classify_status(status: StatusCode) -> FailureKind {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

/// NDJSON body with one `index` action per document
pub fn build_bulk_body(documents: &[SinkDocument], indices: &IndexNames) -> String {
    let mut body = String::new();
    for doc in documents {
        let action = json!({
            "index": {
                "_index": indices.name(doc.index),
                "_id": doc.id,
            }
        });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&doc.body.to_string());
        body.push('\n');
    }
    body
}

/// Map per-item statuses of a bulk response back to the request documents.
///
/// Items are returned in request order.
pub fn parse_bulk_response(documents: &[SinkDocument], response: &Value) -> SinkResult<WriteOutcome> {
    if response.get("errors").and_then(Value::as_bool) == Some(false) {
        return Ok(WriteOutcome::Success);
    }

    let items = response
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SinkError::Transient("bulk response has no items".to_string()))?;

    if items.len() != documents.len() {
        return Err(SinkError::Transient(format!(
            "bulk response has {} items for {} documents",
            items.len(),
            documents.len()
        )));
    }

    let mut failures = Vec::new();
    for (doc, item) in documents.iter().zip(items) {
        let result = item.as_object().and_then(|obj| obj.values().next());

        let status = result
            .and_then(|r| r.get("status"))
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .and_then(|s| StatusCode::from_u16(s).ok());

        match status {
            Some(status) if status.is_success() => {}
            Some(status) => {
                let reason = result
                    .and_then(|r| r.get("error"))
                    .map(|e| match e.get("reason").and_then(Value::as_str) {
                        Some(reason) => reason.to_string(),
                        None => e.to_string(),
                    })
                    .unwrap_or_else(|| status.to_string());
                failures.push(DocumentFailure {
                    index: doc.index,
                    id: doc.id.clone(),
                    kind: classify_status(status),
                    reason,
                });
            }
            None => failures.push(DocumentFailure {
                index: doc.index,
                id: doc.id.clone(),
                kind: FailureKind::Transient,
                reason: "bulk item has no status".to_string(),
            }),
        }
    }

    if failures.is_empty() {
        Ok(WriteOutcome::Success)
    } else {
        Ok(WriteOutcome::Partial(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<SinkDocument> {
        vec![
            SinkDocument::new(IndexKind::Transactions, "t1", json!({"a": 1})),
            SinkDocument::new(IndexKind::Alerts, "t2", json!({"b": 2})),
            SinkDocument::new(IndexKind::WindowAggregates, "u1#0", json!({"c": 3})),
        ]
    }

    #[test]
    fn test_bulk_body_format() {
        let body = build_bulk_body(&docs()[..2], &IndexNames::default());
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);

        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "transactions");
        assert_eq!(action["index"]["_id"], "t1");
        assert_eq!(lines[1], r#"{"a":1}"#);

        let action: Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(action["index"]["_index"], "alerts");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_custom_index_names() {
        let names = IndexNames {
            transactions: "txn-v2".to_string(),
            ..IndexNames::default()
        };
        let body = build_bulk_body(&docs()[..1], &names);
        assert!(body.contains(r#""_index":"txn-v2""#));
    }

    #[test]
    fn test_parse_success() {
        let response = json!({"took": 3, "errors": false, "items": []});
        assert_eq!(
            parse_bulk_response(&docs(), &response).unwrap(),
            WriteOutcome::Success
        );
    }

    #[test]
    fn test_parse_partial_failure() {
        let response = json!({
            "errors": true,
            "items": [
                {"index": {"_index": "transactions", "_id": "t1", "status": 201}},
                {"index": {"_index": "alerts", "_id": "t2", "status": 429,
                           "error": {"type": "es_rejected_execution_exception", "reason": "queue full"}}},
                {"index": {"_index": "window-aggregates", "_id": "u1#0", "status": 400,
                           "error": {"type": "mapper_parsing_exception", "reason": "bad field"}}}
            ]
        });

        match parse_bulk_response(&docs(), &response).unwrap() {
            WriteOutcome::Partial(failures) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].id, "t2");
                assert_eq!(failures[0].kind, FailureKind::Transient);
                assert_eq!(failures[0].reason, "queue full");
                assert_eq!(failures[1].id, "u1#0");
                assert_eq!(failures[1].kind, FailureKind::Permanent);
            }
            other => panic!("expected partial, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_item_count_mismatch() {
        let response = json!({"errors": true, "items": [{"index": {"status": 200}}]});
        assert!(matches!(
            parse_bulk_response(&docs(), &response),
            Err(SinkError::Transient(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), FailureKind::Permanent);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), FailureKind::Permanent);
    }

    #[test]
    fn test_config_validation() {
        assert!(ElasticsearchConfig::default().validate().is_ok());
        let config = ElasticsearchConfig {
            url: "localhost:9200".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
