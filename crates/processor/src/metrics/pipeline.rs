//! Per-partition pipeline metrics

use super::registry::MetricsRegistry;
use crate::pipeline::BatchSummary;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;

type Labels = Vec<(String, String)>;

/// Counter and gauge families labelled by `partition`
#[derive(Clone, Default)]
pub struct PipelineMetrics {
    pub records_polled: Family<Labels, Counter>,
    pub records_malformed: Family<Labels, Counter>,
    pub events_filtered: Family<Labels, Counter>,
    pub events_duplicate: Family<Labels, Counter>,
    pub events_late_dropped: Family<Labels, Counter>,
    pub lookup_fallbacks: Family<Labels, Counter>,
    pub alerts_emitted: Family<Labels, Counter>,
    pub windows_closed: Family<Labels, Counter>,
    pub documents_written: Family<Labels, Counter>,
    pub documents_dropped: Family<Labels, Counter>,
    pub sink_retries: Family<Labels, Counter>,
    pub batches_committed: Family<Labels, Counter>,
    pub batches_failed: Family<Labels, Counter>,

    pub partition_halted: Family<Labels, Gauge>,
    pub watermark_ms: Family<Labels, Gauge>,
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish_non_exhaustive()
    }
}

fn labels(partition: i32) -> Labels {
    vec![("partition".to_string(), partition.to_string())]
}

impl PipelineMetrics {
    /// Create the metric families and register them
    pub fn new(registry: &MetricsRegistry) -> Self {
        let metrics = Self::default();

        let registry = registry.registry();
        let mut registry = registry.write();
        registry.register(
            "records_polled",
            "Raw records read from the source",
            metrics.records_polled.clone(),
        );
        registry.register(
            "records_malformed",
            "Records skipped because they failed to decode",
            metrics.records_malformed.clone(),
        );
        registry.register(
            "events_filtered",
            "Events at or below the filter threshold",
            metrics.events_filtered.clone(),
        );
        registry.register(
            "events_duplicate",
            "Events suppressed by the dedup filter",
            metrics.events_duplicate.clone(),
        );
        registry.register(
            "events_late_dropped",
            "Events dropped because their window had already closed",
            metrics.events_late_dropped.clone(),
        );
        registry.register(
            "lookup_fallbacks",
            "Location lookups that failed or timed out",
            metrics.lookup_fallbacks.clone(),
        );
        registry.register(
            "alerts_emitted",
            "High-value transaction alerts emitted",
            metrics.alerts_emitted.clone(),
        );
        registry.register(
            "windows_closed",
            "Window aggregates emitted",
            metrics.windows_closed.clone(),
        );
        registry.register(
            "documents_written",
            "Documents confirmed by the sink",
            metrics.documents_written.clone(),
        );
        registry.register(
            "documents_dropped",
            "Documents permanently rejected by the sink",
            metrics.documents_dropped.clone(),
        );
        registry.register(
            "sink_retries",
            "Sink write retries",
            metrics.sink_retries.clone(),
        );
        registry.register(
            "batches_committed",
            "Batches whose offset was committed",
            metrics.batches_committed.clone(),
        );
        registry.register(
            "batches_failed",
            "Batches rolled back after a sink failure",
            metrics.batches_failed.clone(),
        );
        registry.register(
            "partition_halted",
            "1 if the partition worker stopped on a fatal error",
            metrics.partition_halted.clone(),
        );
        registry.register(
            "watermark_ms",
            "Current event-time watermark in epoch milliseconds",
            metrics.watermark_ms.clone(),
        );

        metrics
    }

    /// Add a committed batch's counts
    pub fn record_batch(&self, partition: i32, summary: &BatchSummary) {
        let labels = labels(partition);
        self.records_polled
            .get_or_create(&labels)
            .inc_by(summary.records_polled);
        self.records_malformed
            .get_or_create(&labels)
            .inc_by(summary.records_malformed);
        self.events_filtered
            .get_or_create(&labels)
            .inc_by(summary.events_filtered);
        self.events_duplicate
            .get_or_create(&labels)
            .inc_by(summary.events_duplicate);
        self.events_late_dropped
            .get_or_create(&labels)
            .inc_by(summary.events_late_dropped);
        self.lookup_fallbacks
            .get_or_create(&labels)
            .inc_by(summary.lookup_fallbacks);
        self.alerts_emitted
            .get_or_create(&labels)
            .inc_by(summary.alerts_emitted);
        self.windows_closed
            .get_or_create(&labels)
            .inc_by(summary.windows_closed);
        self.documents_written
            .get_or_create(&labels)
            .inc_by(summary.documents_written);
        self.documents_dropped
            .get_or_create(&labels)
            .inc_by(summary.documents_dropped);
        self.sink_retries
            .get_or_create(&labels)
            .inc_by(summary.sink_retries);
        self.batches_committed.get_or_create(&labels).inc();
        if let Some(watermark) = summary.watermark_ms {
            self.watermark_ms.get_or_create(&labels).set(watermark);
        }
    }

    pub fn record_failed_batch(&self, partition: i32) {
        self.batches_failed.get_or_create(&labels(partition)).inc();
    }

    pub fn set_halted(&self, partition: i32, halted: bool) {
        self.partition_halted
            .get_or_create(&labels(partition))
            .set(i64::from(halted));
    }
}
