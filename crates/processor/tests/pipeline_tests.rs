//! End-to-end tests for the partition pipeline
//!
//! Coverage:
//! - Dedup, enrichment, alerting and user totals on a single batch
//! - Filter and alert threshold boundaries
//! - Tumbling window completeness and late-event handling
//! - Partial and permanent sink failures
//! - Location lookup fallback

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use txn_processor::config::{PipelineConfig, StartingOffset};
use txn_processor::enrichment::{FnLocationLookup, LocationLookup, StaticLocationLookup};
use txn_processor::error::{LookupError, SinkError};
use txn_processor::pipeline::{BatchOutcome, BatchSummary, PartitionPipeline, PipelineResources};
use txn_processor::sink::{FailureKind, IndexKind, MemorySink};
use txn_processor::source::MemoryLog;
use txn_processor::state::InMemoryOffsetStore;
use txn_processor::UNKNOWN_LOCATION;

/// 2023-11-14T22:13:20Z
const T0: i64 = 1_700_000_000_000;

/// Start of a five-minute window
const W0: i64 = 1_700_000_100_000;

fn txn(id: &str, user: &str, amount: f64, ts_ms: i64) -> String {
    json!({
        "transactionId": id,
        "userId": user,
        "transactionAmount": amount,
        "ipAddress": "10.0.0.1",
        "timestamp": ts_ms,
    })
    .to_string()
}

fn approx(value: &Value, expected: f64) -> bool {
    value
        .as_f64()
        .map(|v| (v - expected).abs() < 1e-6)
        .unwrap_or(false)
}

struct Fixture {
    log: Arc<MemoryLog>,
    store: Arc<InMemoryOffsetStore>,
    sink: Arc<MemorySink>,
    lookup: Arc<dyn LocationLookup>,
    config: PipelineConfig,
}

impl Fixture {
    fn new() -> Self {
        let mut config = PipelineConfig::default();
        config.batch.poll_timeout_ms = 10;
        config.sink.base_backoff_ms = 1;
        config.sink.max_backoff_ms = 4;

        Self {
            log: Arc::new(MemoryLog::with_partitions(&[0])),
            store: Arc::new(InMemoryOffsetStore::new()),
            sink: Arc::new(MemorySink::new()),
            lookup: Arc::new(StaticLocationLookup::default()),
            config,
        }
    }

    fn with_lookup(mut self, lookup: Arc<dyn LocationLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    fn push(&self, id: &str, user: &str, amount: f64, ts_ms: i64) {
        self.log.append(0, txn(id, user, amount, ts_ms));
    }

    async fn open(&self) -> PartitionPipeline {
        let resources = PipelineResources {
            log: self.log.clone(),
            store: self.store.clone(),
            sink: self.sink.clone(),
            lookup: self.lookup.clone(),
            metrics: None,
        };
        PartitionPipeline::open(0, self.config.clone(), StartingOffset::Resume, resources)
            .await
            .unwrap()
    }
}

async fn commit_next(pipeline: &mut PartitionPipeline) -> BatchSummary {
    match pipeline.step().await.unwrap() {
        BatchOutcome::Committed(summary) => summary,
        other => panic!("expected a committed batch, got {:?}", other),
    }
}

mod single_batch_tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_alert_and_totals_scenario() {
        let fixture = Fixture::new();
        fixture.push("t1", "u1", 1500.0, T0);
        fixture.push("t1", "u1", 1500.0, T0 + 1_000);
        fixture.push("t2", "u1", 12000.0, T0 + 2_000);

        let mut pipeline = fixture.open().await;
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.records_polled, 3);
        assert_eq!(summary.events_duplicate, 1);
        assert_eq!(summary.alerts_emitted, 1);
        assert_eq!(summary.next_offset, 3);

        let sink = &fixture.sink;
        assert_eq!(sink.count(IndexKind::Transactions), 2);
        let t1 = sink.get(IndexKind::Transactions, "t1").unwrap();
        let t2 = sink.get(IndexKind::Transactions, "t2").unwrap();
        assert!(approx(&t1["adjustedAmount"], 1650.0));
        assert!(approx(&t2["adjustedAmount"], 13200.0));
        assert_eq!(t1["location"], UNKNOWN_LOCATION);

        assert_eq!(sink.count(IndexKind::Alerts), 1);
        let alert = sink.get(IndexKind::Alerts, "t2").unwrap();
        assert_eq!(alert["userId"], "u1");
        assert!(approx(&alert["amount"], 12000.0));

        let total = sink.get(IndexKind::UserTotals, "u1").unwrap();
        assert!(approx(&total["totalTransactionAmount"], 13500.0));
        assert_eq!(total["transactionCount"], 2);

        assert_eq!(fixture.store.commit_history(0), vec![3]);
    }

    #[tokio::test]
    async fn test_threshold_boundaries_are_strict() {
        let fixture = Fixture::new();
        fixture.push("at-filter", "u1", 1000.00, T0);
        fixture.push("above-filter", "u1", 1000.01, T0 + 1);
        fixture.push("at-alert", "u2", 10000.00, T0 + 2);
        fixture.push("above-alert", "u2", 10000.01, T0 + 3);

        let mut pipeline = fixture.open().await;
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.events_filtered, 1);
        let sink = &fixture.sink;
        assert!(sink.get(IndexKind::Transactions, "at-filter").is_none());
        assert!(sink.get(IndexKind::Transactions, "above-filter").is_some());
        assert!(sink.get(IndexKind::Alerts, "at-alert").is_none());
        assert!(sink.get(IndexKind::Alerts, "above-alert").is_some());
    }

    #[tokio::test]
    async fn test_iso_timestamps_and_malformed_records() {
        let fixture = Fixture::new();
        fixture.log.append(
            0,
            r#"{"transactionId":"t1","userId":"u1","transactionAmount":2500.0,"ipAddress":"1.2.3.4","timestamp":"2024-03-01T12:00:00Z"}"#,
        );
        fixture.log.append(
            0,
            r#"{"transactionId":"t2","userId":"u1","transactionAmount":"lots","ipAddress":"1.2.3.4","timestamp":"2024-03-01T12:00:01Z"}"#,
        );
        fixture.log.append(0, "{}");

        let mut pipeline = fixture.open().await;
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.records_malformed, 2);
        assert_eq!(summary.next_offset, 3);
        let t1 = fixture.sink.get(IndexKind::Transactions, "t1").unwrap();
        assert_eq!(t1["timestamp"], "2024-03-01T12:00:00+00:00");
    }
}

mod dedup_tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_within_horizon_has_one_effect() {
        let fixture = Fixture::new();
        fixture.push("t1", "u1", 2000.0, T0);
        fixture.push("t2", "u1", 2000.0, T0 + 60_000);
        fixture.push("t1", "u1", 2000.0, T0 + 120_000);

        let mut pipeline = fixture.open().await;
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.events_duplicate, 1);
        let total = fixture.sink.get(IndexKind::UserTotals, "u1").unwrap();
        assert_eq!(total["transactionCount"], 2);
    }

    #[tokio::test]
    async fn test_duplicate_across_batches_is_suppressed() {
        let fixture = Fixture::new();
        fixture.push("t1", "u1", 2000.0, T0);
        let mut pipeline = fixture.open().await;
        commit_next(&mut pipeline).await;

        fixture.push("t1", "u1", 2000.0, T0 + 5_000);
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.events_duplicate, 1);
        let total = fixture.sink.get(IndexKind::UserTotals, "u1").unwrap();
        assert_eq!(total["transactionCount"], 1);
    }

    #[tokio::test]
    async fn test_duplicate_past_horizon_is_accepted_again() {
        let fixture = Fixture::new();
        let retention = fixture.config.dedup.retention_ms as i64;
        fixture.push("t1", "u1", 2000.0, T0);
        fixture.push("t9", "u1", 2000.0, T0 + retention + 1);
        fixture.push("t1", "u1", 2000.0, T0 + retention + 2);

        let mut pipeline = fixture.open().await;
        let summary = commit_next(&mut pipeline).await;

        // Weak guarantee: once the entry expires, the id counts as new
        assert_eq!(summary.events_duplicate, 0);
        let total = fixture.sink.get(IndexKind::UserTotals, "u1").unwrap();
        assert_eq!(total["transactionCount"], 3);
    }
}

mod window_tests {
    use super::*;

    async fn close_first_window(fixture: &Fixture, pipeline: &mut PartitionPipeline) {
        fixture.push("a1", "u1", 2000.0, W0 + 1_000);
        fixture.push("a2", "u1", 3000.0, W0 + 5_000);
        fixture.push("a3", "u1", 1500.0, W0 + 299_999);
        fixture.push("b1", "u2", 5000.0, W0 + 10);
        fixture.push("a4", "u1", 1200.0, W0 + 300_000);
        let summary = commit_next(pipeline).await;
        assert_eq!(summary.windows_closed, 0);

        // Watermark reaches W0 + 340_000 and closes [W0, W0 + 300_000)
        fixture.push("c1", "u3", 1001.0, W0 + 400_000);
        let summary = commit_next(pipeline).await;
        assert_eq!(summary.windows_closed, 2);
        assert_eq!(summary.watermark_ms, Some(W0 + 340_000));
    }

    #[tokio::test]
    async fn test_window_sum_and_count_are_exact() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.open().await;
        close_first_window(&fixture, &mut pipeline).await;

        let sink = &fixture.sink;
        let u1 = sink
            .get(IndexKind::WindowAggregates, &format!("u1#{}", W0))
            .unwrap();
        assert!(approx(&u1["sum"], 6500.0));
        assert_eq!(u1["count"], 3);
        assert!(approx(&u1["avgTransactionAmount"], 6500.0 / 3.0));
        assert_eq!(u1["windowStart"], "2023-11-14T22:15:00+00:00");
        assert_eq!(u1["windowEnd"], "2023-11-14T22:20:00+00:00");

        let u2 = sink
            .get(IndexKind::WindowAggregates, &format!("u2#{}", W0))
            .unwrap();
        assert!(approx(&u2["sum"], 5000.0));
        assert_eq!(u2["count"], 1);

        // The next window is still open
        assert!(sink
            .get(IndexKind::WindowAggregates, &format!("u1#{}", W0 + 300_000))
            .is_none());
        assert_eq!(sink.count(IndexKind::WindowAggregates), 2);
    }

    #[tokio::test]
    async fn test_late_event_is_dropped_from_closed_window() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.open().await;
        close_first_window(&fixture, &mut pipeline).await;

        fixture.push("late", "u1", 2000.0, W0 + 2_000);
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.events_late_dropped, 1);
        assert_eq!(summary.windows_closed, 0);
        assert_eq!(pipeline.stats().events_late_dropped, 1);

        let sink = &fixture.sink;
        let u1 = sink
            .get(IndexKind::WindowAggregates, &format!("u1#{}", W0))
            .unwrap();
        assert_eq!(u1["count"], 3);

        // Only window aggregation drops the event
        assert!(sink.get(IndexKind::Transactions, "late").is_some());
        let total = sink.get(IndexKind::UserTotals, "u1").unwrap();
        assert_eq!(total["transactionCount"], 5);
    }
}

mod sink_failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_partial_failure_retries_only_failed_documents() {
        let fixture = Fixture::new();
        fixture.push("t1", "u1", 1500.0, T0);
        fixture.push("t2", "u2", 2500.0, T0 + 1);
        fixture
            .sink
            .fail_document(IndexKind::Transactions, "t1", FailureKind::Transient, 2);

        let mut pipeline = fixture.open().await;
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.sink_retries, 2);
        assert_eq!(summary.documents_dropped, 0);

        let calls = fixture.sink.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].len(), 4);
        for retry in &calls[1..] {
            assert_eq!(retry, &vec![(IndexKind::Transactions, "t1".to_string())]);
        }
        assert!(fixture.sink.get(IndexKind::Transactions, "t1").is_some());
        assert_eq!(fixture.store.commit_history(0), vec![2]);
    }

    #[tokio::test]
    async fn test_permanent_document_failure_is_dropped_and_committed() {
        let fixture = Fixture::new();
        fixture.push("t1", "u1", 1500.0, T0);
        fixture.push("t2", "u1", 15000.0, T0 + 1);
        fixture
            .sink
            .fail_document(IndexKind::Alerts, "t2", FailureKind::Permanent, 1);

        let mut pipeline = fixture.open().await;
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.documents_dropped, 1);
        assert_eq!(summary.sink_retries, 0);
        assert!(fixture.sink.get(IndexKind::Alerts, "t2").is_none());
        assert!(fixture.sink.get(IndexKind::Transactions, "t2").is_some());
        assert_eq!(fixture.store.commit_history(0), vec![2]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_offset_uncommitted() {
        let fixture = Fixture::new();
        fixture.push("t1", "u1", 1500.0, T0);
        let attempts = fixture.config.sink.max_retries + 1;
        for _ in 0..attempts {
            fixture
                .sink
                .fail_next_call(SinkError::Transient("503".to_string()));
        }

        let mut pipeline = fixture.open().await;
        match pipeline.step().await.unwrap() {
            BatchOutcome::RolledBack { error } => {
                assert!(matches!(error, SinkError::RetriesExhausted { .. }));
            }
            other => panic!("expected a rolled back batch, got {:?}", other),
        }
        assert!(fixture.store.commit_history(0).is_empty());
        assert_eq!(pipeline.next_offset(), 0);

        let summary = commit_next(&mut pipeline).await;
        assert_eq!(summary.first_offset, 0);
        assert!(fixture.sink.get(IndexKind::Transactions, "t1").is_some());
    }
}

mod enrichment_tests {
    use super::*;

    struct StalledLookup;

    #[async_trait]
    impl LocationLookup for StalledLookup {
        async fn lookup(&self, _ip_address: &str) -> Result<String, LookupError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("Nowhere".to_string())
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back() {
        let lookup = FnLocationLookup::new(|ip: &str| {
            if ip == "10.0.0.1" {
                Ok("Istanbul".to_string())
            } else {
                Err(LookupError::Failed {
                    ip: ip.to_string(),
                    reason: "no route".to_string(),
                })
            }
        });
        let fixture = Fixture::new().with_lookup(Arc::new(lookup));
        fixture.push("t1", "u1", 1500.0, T0);
        fixture.log.append(
            0,
            json!({
                "transactionId": "t2",
                "userId": "u1",
                "transactionAmount": 1500.0,
                "ipAddress": "192.168.1.1",
                "timestamp": T0 + 1,
            })
            .to_string(),
        );

        let mut pipeline = fixture.open().await;
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.lookup_fallbacks, 1);
        let t1 = fixture.sink.get(IndexKind::Transactions, "t1").unwrap();
        let t2 = fixture.sink.get(IndexKind::Transactions, "t2").unwrap();
        assert_eq!(t1["location"], "Istanbul");
        assert_eq!(t2["location"], UNKNOWN_LOCATION);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_timeout_falls_back() {
        let fixture = Fixture::new().with_lookup(Arc::new(StalledLookup));
        fixture.push("t1", "u1", 20000.0, T0);

        let mut pipeline = fixture.open().await;
        let summary = commit_next(&mut pipeline).await;

        assert_eq!(summary.lookup_fallbacks, 1);
        assert_eq!(summary.alerts_emitted, 1);
        let alert = fixture.sink.get(IndexKind::Alerts, "t1").unwrap();
        assert_eq!(alert["location"], UNKNOWN_LOCATION);
    }
}
