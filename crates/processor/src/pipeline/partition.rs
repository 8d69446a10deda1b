//! Single-partition pipeline
//!
//! One [`PartitionPipeline`] owns every piece of state for its partition and
//! drives the batch-then-commit loop:
//!
//! 1. poll a bounded batch from the committed offset
//! 2. decode, filter, dedup, enrich, aggregate and classify each record
//! 3. advance the watermark and emit the windows it closes
//! 4. write all documents through the [`SinkWriter`]
//! 5. commit the next offset together with the operator state
//!
//! Each batch is transformed on a copy of the operator state, which replaces
//! the live state only once the checkpoint is committed. A batch that fails
//! at any point leaves offset and state as they were and is read again.

use super::stats::{BatchSummary, PartitionStats};
use crate::classify::{AlertClassifier, AmountFilter};
use crate::config::{PipelineConfig, StartingOffset};
use crate::decoder::EventDecoder;
use crate::dedup::DedupFilter;
use crate::enrichment::{Enricher, LocationLookup};
use crate::error::{ProcessorError, Result, SinkError, SourceError, StateError};
use crate::metrics::PipelineMetrics;
use crate::sink::{DocumentSink, SinkDocument, SinkWriter};
use crate::source::{PartitionLog, SourceRecord};
use crate::state::{OffsetStore, PartitionCheckpoint, PartitionState, CHECKPOINT_VERSION};
use crate::totals::UserTotals;
use crate::window::{Assignment, WindowedAggregator};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// External collaborators shared by all partition workers
#[derive(Clone)]
pub struct PipelineResources {
    pub log: Arc<dyn PartitionLog>,
    pub store: Arc<dyn OffsetStore>,
    pub sink: Arc<dyn DocumentSink>,
    pub lookup: Arc<dyn LocationLookup>,
    pub metrics: Option<PipelineMetrics>,
}

impl std::fmt::Debug for PipelineResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineResources")
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// What happened to a polled batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Nothing arrived before the poll timeout
    Idle,
    /// Outputs written and offset committed
    Committed(BatchSummary),
    /// The sink did not confirm the batch; offset and state are unchanged
    RolledBack { error: SinkError },
}

/// Operator state of one partition
#[derive(Debug, Clone)]
struct OperatorState {
    stream_clock_ms: Option<i64>,
    dedup: DedupFilter,
    windows: WindowedAggregator,
    totals: UserTotals,
}

impl OperatorState {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            stream_clock_ms: None,
            dedup: DedupFilter::new(config.dedup.retention(), config.dedup.max_entries),
            windows: WindowedAggregator::new(config.window.size(), config.window.allowed_lateness()),
            totals: UserTotals::new(),
        }
    }

    fn restore(config: &PipelineConfig, state: PartitionState) -> Self {
        Self {
            stream_clock_ms: state.stream_clock_ms,
            dedup: DedupFilter::from_snapshot(
                config.dedup.retention(),
                config.dedup.max_entries,
                state.dedup,
            ),
            windows: WindowedAggregator::from_snapshot(
                config.window.size(),
                config.window.allowed_lateness(),
                state.windows,
            ),
            totals: UserTotals::from_snapshot(state.user_totals),
        }
    }

    fn snapshot(&self) -> PartitionState {
        PartitionState {
            stream_clock_ms: self.stream_clock_ms,
            dedup: self.dedup.snapshot(),
            windows: self.windows.snapshot(),
            user_totals: self.totals.snapshot(),
        }
    }

    /// Advance the stream clock and return it
    fn observe(&mut self, timestamp_ms: i64) -> i64 {
        let clock = self
            .stream_clock_ms
            .map_or(timestamp_ms, |clock| clock.max(timestamp_ms));
        self.stream_clock_ms = Some(clock);
        clock
    }
}

/// Sequential batch pipeline for one partition
pub struct PartitionPipeline {
    partition: i32,
    config: PipelineConfig,
    log: Arc<dyn PartitionLog>,
    store: Arc<dyn OffsetStore>,
    writer: SinkWriter,
    enricher: Enricher,
    decoder: EventDecoder,
    filter: AmountFilter,
    classifier: AlertClassifier,
    state: OperatorState,
    next_offset: i64,
    stats: PartitionStats,
    metrics: Option<PipelineMetrics>,
}

impl std::fmt::Debug for PartitionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionPipeline")
            .field("partition", &self.partition)
            .field("next_offset", &self.next_offset)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl PartitionPipeline {
    /// Open a partition and position it according to `starting_offset`.
    ///
    /// `Resume` restores the committed checkpoint, or starts from the
    /// earliest offset when there is none. `Earliest` and `Latest` discard any
    /// checkpoint and start with empty state.
    pub async fn open(
        partition: i32,
        config: PipelineConfig,
        starting_offset: StartingOffset,
        resources: PipelineResources,
    ) -> Result<Self> {
        config.validate()?;

        let PipelineResources {
            log,
            store,
            sink,
            lookup,
            metrics,
        } = resources;

        let (state, next_offset) = match starting_offset {
            StartingOffset::Resume => match store.load(partition).await? {
                Some(checkpoint) => {
                    check_checkpoint(partition, &checkpoint)?;
                    info!(
                        partition,
                        offset = checkpoint.next_offset,
                        committed_at = %checkpoint.committed_at,
                        "Resuming from checkpoint"
                    );
                    (
                        OperatorState::restore(&config, checkpoint.state),
                        checkpoint.next_offset,
                    )
                }
                None => {
                    let offset = log.earliest_offset(partition).await?;
                    info!(partition, offset, "No checkpoint, starting from earliest offset");
                    (OperatorState::new(&config), offset)
                }
            },
            StartingOffset::Earliest => {
                store.reset(partition).await?;
                let offset = log.earliest_offset(partition).await?;
                info!(partition, offset, "Starting from earliest offset");
                (OperatorState::new(&config), offset)
            }
            StartingOffset::Latest => {
                store.reset(partition).await?;
                let offset = log.latest_offset(partition).await?;
                info!(partition, offset, "Starting from latest offset");
                (OperatorState::new(&config), offset)
            }
        };

        let mut stats = PartitionStats::new(partition);
        if !state.windows.watermark().is_min() {
            stats.watermark_ms = Some(state.windows.watermark().timestamp);
        }

        if let Some(metrics) = &metrics {
            metrics.set_halted(partition, false);
        }

        Ok(Self {
            partition,
            writer: SinkWriter::new(sink, config.sink.clone()),
            enricher: Enricher::new(
                lookup,
                config.surcharge_factor,
                config.enrichment.lookup_timeout(),
            ),
            decoder: EventDecoder::new(),
            filter: AmountFilter::new(config.filter_threshold),
            classifier: AlertClassifier::new(config.alert_threshold),
            config,
            log,
            store,
            state,
            next_offset,
            stats,
            metrics,
        })
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset the next poll starts from
    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    pub fn stats(&self) -> &PartitionStats {
        &self.stats
    }

    /// Poll the next batch from the current offset
    pub async fn poll_batch(&self) -> Result<Vec<SourceRecord>> {
        let records = self
            .log
            .poll(
                self.partition,
                self.next_offset,
                self.config.batch.max_batch,
                self.config.batch.poll_timeout(),
            )
            .await?;
        Ok(records)
    }

    /// Poll one batch and process it
    pub async fn step(&mut self) -> Result<BatchOutcome> {
        let records = self.poll_batch().await?;
        self.process_batch(records).await
    }

    /// Run a polled batch through every stage and commit it.
    ///
    /// Records below the current offset are ignored. Returns `Err` only for
    /// conditions that must halt the partition.
    pub async fn process_batch(&mut self, records: Vec<SourceRecord>) -> Result<BatchOutcome> {
        let records: Vec<SourceRecord> = records
            .into_iter()
            .filter(|record| record.offset >= self.next_offset)
            .collect();

        let (first_offset, last_offset) = match (records.first(), records.last()) {
            (Some(first), Some(last)) => (first.offset, last.offset),
            _ => return Ok(BatchOutcome::Idle),
        };

        let mut summary = BatchSummary {
            first_offset,
            next_offset: last_offset + 1,
            records_polled: records.len() as u64,
            ..Default::default()
        };
        let mut working = self.state.clone();
        let documents = self.transform(&mut working, &records, &mut summary).await;

        let report = match self.writer.write_all(documents).await {
            Ok(report) => report,
            Err(e) if e.is_retryable() => {
                warn!(
                    partition = self.partition,
                    first_offset,
                    last_offset,
                    error = %e,
                    "Sink did not confirm batch, rolling back"
                );
                self.stats.inc_batches_failed();
                if let Some(metrics) = &self.metrics {
                    metrics.record_failed_batch(self.partition);
                }
                return Ok(BatchOutcome::RolledBack { error: e });
            }
            Err(e) => return Err(e.into()),
        };
        summary.documents_written = report.written as u64;
        summary.documents_dropped = report.dropped as u64;
        summary.sink_retries = u64::from(report.retries);

        let watermark = working.windows.watermark();
        summary.watermark_ms = (!watermark.is_min()).then_some(watermark.timestamp);

        let checkpoint =
            PartitionCheckpoint::new(self.partition, summary.next_offset, working.snapshot());
        self.store.commit(&checkpoint).await?;
        self.state = working;
        self.next_offset = summary.next_offset;

        self.stats.record_batch(&summary);
        if let Some(metrics) = &self.metrics {
            metrics.record_batch(self.partition, &summary);
        }

        debug!(
            partition = self.partition,
            first_offset,
            next_offset = summary.next_offset,
            records = summary.records_polled,
            written = summary.documents_written,
            watermark = %watermark,
            "Batch committed"
        );
        Ok(BatchOutcome::Committed(summary))
    }

    /// Apply the stages to every record and collect the documents to write
    async fn transform(
        &self,
        state: &mut OperatorState,
        records: &[SourceRecord],
        summary: &mut BatchSummary,
    ) -> Vec<SinkDocument> {
        let mut documents = Vec::with_capacity(records.len() * 2);
        let mut batch_max_ts: Option<i64> = None;

        for record in records {
            let event = match self.decoder.decode(&record.payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        partition = self.partition,
                        offset = record.offset,
                        error = %e,
                        "Skipping malformed record"
                    );
                    summary.records_malformed += 1;
                    continue;
                }
            };

            if !self.filter.passes(&event) {
                summary.events_filtered += 1;
                continue;
            }

            let timestamp_ms = event.timestamp_millis();
            batch_max_ts = Some(batch_max_ts.map_or(timestamp_ms, |ts| ts.max(timestamp_ms)));
            let clock = state.observe(timestamp_ms);

            if !state.dedup.accept(&event.transaction_id, clock) {
                debug!(
                    partition = self.partition,
                    offset = record.offset,
                    transaction_id = %event.transaction_id,
                    "Duplicate transaction suppressed"
                );
                summary.events_duplicate += 1;
                continue;
            }

            let (enriched, lookup_error) = self.enricher.enrich_detailed(event).await;
            if lookup_error.is_some() {
                summary.lookup_fallbacks += 1;
            }

            let event = &enriched.event;
            let total = state.totals.update(&event.user_id, event.amount);
            documents.push(SinkDocument::user_total(&total));

            if let Assignment::Late { key, watermark } =
                state
                    .windows
                    .add(&event.user_id, timestamp_ms, event.amount)
            {
                warn!(
                    partition = self.partition,
                    offset = record.offset,
                    transaction_id = %event.transaction_id,
                    window = %key.bounds,
                    %watermark,
                    "Dropping late event from window aggregation"
                );
                summary.events_late_dropped += 1;
            }

            if let Some(alert) = self.classifier.classify(&enriched) {
                summary.alerts_emitted += 1;
                documents.push(SinkDocument::alert(&alert));
            }

            documents.push(SinkDocument::transaction(&enriched));
        }

        if let Some(max_ts) = batch_max_ts {
            for aggregate in state.windows.advance(max_ts) {
                summary.windows_closed += 1;
                documents.push(SinkDocument::window(&aggregate));
            }
        }

        if let Some(clock) = state.stream_clock_ms {
            let expired = state.dedup.evict_expired(clock);
            if expired > 0 {
                debug!(partition = self.partition, expired, "Evicted dedup entries");
            }
        }

        documents
    }

    fn halt(&self, error: ProcessorError) -> ProcessorError {
        error!(
            partition = self.partition,
            offset = self.next_offset,
            error = %error,
            "Partition halted"
        );
        if let Some(metrics) = &self.metrics {
            metrics.set_halted(self.partition, true);
        }
        error
    }

    /// Process batches until `shutdown` fires or a fatal error occurs.
    ///
    /// Cancellation is only observed between batches, so an in-flight batch
    /// is always either committed or rolled back.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<PartitionStats> {
        info!(
            partition = self.partition,
            offset = self.next_offset,
            "Partition worker started"
        );
        let backoff = self.config.batch.retry_backoff();

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.poll_batch() => polled,
            };

            let records = match polled {
                Ok(records) => records,
                Err(ProcessorError::Source(SourceError::Poll {
                    offset, message, ..
                })) => {
                    warn!(
                        partition = self.partition,
                        offset,
                        error = %message,
                        "Poll failed, retrying"
                    );
                    if wait_or_cancel(&shutdown, backoff).await {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(self.halt(e)),
            };

            match self.process_batch(records).await {
                Ok(BatchOutcome::Idle) | Ok(BatchOutcome::Committed(_)) => {}
                Ok(BatchOutcome::RolledBack { .. }) => {
                    if wait_or_cancel(&shutdown, backoff).await {
                        break;
                    }
                }
                Err(e) => return Err(self.halt(e)),
            }
        }

        info!(
            partition = self.partition,
            offset = self.next_offset,
            batches = self.stats.batches_committed,
            "Partition worker stopped"
        );
        Ok(self.stats.clone())
    }
}

/// Sleep for `backoff`; true if cancelled first
async fn wait_or_cancel(shutdown: &CancellationToken, backoff: std::time::Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(backoff) => false,
    }
}

fn check_checkpoint(partition: i32, checkpoint: &PartitionCheckpoint) -> Result<()> {
    let reason = if checkpoint.version != CHECKPOINT_VERSION {
        format!(
            "unsupported checkpoint version {} (expected {})",
            checkpoint.version, CHECKPOINT_VERSION
        )
    } else if checkpoint.partition != partition {
        format!("checkpoint belongs to partition {}", checkpoint.partition)
    } else {
        return Ok(());
    };

    Err(StateError::DeserializationFailed {
        key: format!("partition-{}", partition),
        reason,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::StaticLocationLookup;
    use crate::sink::{IndexKind, MemorySink};
    use crate::source::MemoryLog;
    use crate::state::InMemoryOffsetStore;
    use serde_json::json;

    struct Harness {
        log: Arc<MemoryLog>,
        store: Arc<InMemoryOffsetStore>,
        sink: Arc<MemorySink>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                log: Arc::new(MemoryLog::with_partitions(&[0])),
                store: Arc::new(InMemoryOffsetStore::new()),
                sink: Arc::new(MemorySink::new()),
            }
        }

        fn resources(&self) -> PipelineResources {
            PipelineResources {
                log: self.log.clone(),
                store: self.store.clone(),
                sink: self.sink.clone(),
                lookup: Arc::new(StaticLocationLookup::default()),
                metrics: None,
            }
        }

        async fn open(&self, starting_offset: StartingOffset) -> PartitionPipeline {
            let mut config = PipelineConfig::default();
            config.batch.poll_timeout_ms = 10;
            config.sink.base_backoff_ms = 1;
            config.sink.max_backoff_ms = 2;
            PartitionPipeline::open(0, config, starting_offset, self.resources())
                .await
                .unwrap()
        }

        fn append(&self, id: &str, user: &str, amount: f64, ts_ms: i64) {
            let payload = json!({
                "transactionId": id,
                "userId": user,
                "transactionAmount": amount,
                "ipAddress": "10.0.0.1",
                "timestamp": ts_ms,
            });
            self.log.append(0, payload.to_string());
        }
    }

    #[tokio::test]
    async fn test_malformed_batch_still_commits() {
        let harness = Harness::new();
        harness.log.append(0, "not json");
        harness.log.append(0, r#"{"transactionId":"t1"}"#);

        let mut pipeline = harness.open(StartingOffset::Resume).await;
        let outcome = pipeline.step().await.unwrap();

        match outcome {
            BatchOutcome::Committed(summary) => {
                assert_eq!(summary.records_malformed, 2);
                assert_eq!(summary.next_offset, 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(harness.store.commit_history(0), vec![2]);
        assert!(harness.sink.is_empty());
    }

    #[tokio::test]
    async fn test_idle_poll_commits_nothing() {
        let harness = Harness::new();
        let mut pipeline = harness.open(StartingOffset::Resume).await;

        assert_eq!(pipeline.step().await.unwrap(), BatchOutcome::Idle);
        assert!(harness.store.commit_history(0).is_empty());
    }

    #[tokio::test]
    async fn test_rollback_keeps_offset_and_state() {
        let harness = Harness::new();
        harness.append("t1", "u1", 1500.0, 1_000);

        let mut pipeline = harness.open(StartingOffset::Resume).await;
        // Initial attempt plus every retry
        for _ in 0..6 {
            harness
                .sink
                .fail_next_call(SinkError::Transient("unavailable".to_string()));
        }
        let outcome = pipeline.step().await.unwrap();
        assert!(matches!(outcome, BatchOutcome::RolledBack { .. }));
        assert_eq!(pipeline.next_offset(), 0);
        assert_eq!(pipeline.stats().batches_failed, 1);
        assert!(harness.store.commit_history(0).is_empty());

        // The re-read batch sees t1 as new again
        let outcome = pipeline.step().await.unwrap();
        match outcome {
            BatchOutcome::Committed(summary) => assert_eq!(summary.events_duplicate, 0),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let total = harness.sink.get(IndexKind::UserTotals, "u1").unwrap();
        assert_eq!(total["transactionCount"], 1);
    }

    #[tokio::test]
    async fn test_permanent_call_error_halts() {
        let harness = Harness::new();
        harness.append("t1", "u1", 1500.0, 1_000);

        let mut pipeline = harness.open(StartingOffset::Resume).await;
        harness
            .sink
            .fail_next_call(SinkError::Permanent("forbidden".to_string()));

        let result = pipeline.run(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ProcessorError::Sink(SinkError::Permanent(_)))
        ));
        assert!(harness.store.commit_history(0).is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_leaves_state_untouched() {
        let harness = Harness::new();
        harness.append("t1", "u1", 1500.0, 1_000);

        let mut pipeline = harness.open(StartingOffset::Resume).await;
        harness
            .sink
            .fail_next_call(SinkError::Permanent("forbidden".to_string()));
        assert!(pipeline.step().await.is_err());
        assert_eq!(pipeline.next_offset(), 0);

        // Stepping again after a fatal error must not treat t1 as seen
        let outcome = pipeline.step().await.unwrap();
        match outcome {
            BatchOutcome::Committed(summary) => {
                assert_eq!(summary.events_duplicate, 0);
                assert!(summary.documents_written > 0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(harness.store.commit_history(0), vec![1]);
        assert!(harness.sink.get(IndexKind::Transactions, "t1").is_some());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_state_untouched() {
        let harness = Harness::new();
        harness.append("t1", "u1", 1500.0, 1_000);

        let mut pipeline = harness.open(StartingOffset::Resume).await;
        harness.store.fail_commits("disk full");
        assert!(matches!(
            pipeline.step().await,
            Err(ProcessorError::State(_))
        ));
        assert_eq!(pipeline.next_offset(), 0);

        harness.store.clear_failures();
        match pipeline.step().await.unwrap() {
            BatchOutcome::Committed(summary) => assert_eq!(summary.events_duplicate, 0),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let total = harness.sink.get(IndexKind::UserTotals, "u1").unwrap();
        assert_eq!(total["transactionCount"], 1);
    }

    #[tokio::test]
    async fn test_checkpoint_dedup_bounded_by_max_entries() {
        let harness = Harness::new();
        for i in 0..5 {
            harness.append(&format!("t{}", i), "u1", 1500.0, 1_000 + i);
        }

        let mut config = PipelineConfig::default();
        config.batch.poll_timeout_ms = 10;
        config.dedup.max_entries = 2;
        let mut pipeline =
            PartitionPipeline::open(0, config, StartingOffset::Resume, harness.resources())
                .await
                .unwrap();
        assert!(matches!(
            pipeline.step().await.unwrap(),
            BatchOutcome::Committed(_)
        ));

        let checkpoint = harness.store.load(0).await.unwrap().unwrap();
        assert_eq!(checkpoint.next_offset, 5);
        assert_eq!(checkpoint.state.dedup.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_skips_existing_records() {
        let harness = Harness::new();
        harness.append("t1", "u1", 1500.0, 1_000);

        let mut pipeline = harness.open(StartingOffset::Latest).await;
        assert_eq!(pipeline.next_offset(), 1);

        harness.append("t2", "u1", 2500.0, 2_000);
        pipeline.step().await.unwrap();

        assert!(harness.sink.get(IndexKind::Transactions, "t1").is_none());
        assert!(harness.sink.get(IndexKind::Transactions, "t2").is_some());
    }

    #[test]
    fn test_check_checkpoint() {
        let checkpoint = PartitionCheckpoint::new(7, 3, PartitionState::default());
        assert!(check_checkpoint(7, &checkpoint).is_ok());
        assert!(check_checkpoint(0, &checkpoint).is_err());

        let mut future = checkpoint.clone();
        future.version = CHECKPOINT_VERSION + 1;
        assert!(matches!(
            check_checkpoint(7, &future),
            Err(ProcessorError::State(StateError::DeserializationFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let harness = Harness::new();
        harness.append("t1", "u1", 1500.0, 1_000);
        let mut pipeline = harness.open(StartingOffset::Resume).await;

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { pipeline.run(token).await });

        // Wait for the first batch to land
        for _ in 0..100 {
            if !harness.store.commit_history(0).is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        shutdown.cancel();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.batches_committed, 1);
        assert_eq!(stats.committed_offset, Some(1));
    }
}
