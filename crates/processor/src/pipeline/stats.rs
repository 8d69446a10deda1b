//! Batch and partition statistics

use serde::{Deserialize, Serialize};

/// What one committed batch did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub first_offset: i64,
    /// Offset committed as the resume point
    pub next_offset: i64,
    pub records_polled: u64,
    pub records_malformed: u64,
    pub events_filtered: u64,
    pub events_duplicate: u64,
    pub events_late_dropped: u64,
    pub lookup_fallbacks: u64,
    pub alerts_emitted: u64,
    pub windows_closed: u64,
    pub documents_written: u64,
    pub documents_dropped: u64,
    pub sink_retries: u64,
    /// Watermark after the batch, if any event has been seen
    pub watermark_ms: Option<i64>,
}

/// Cumulative statistics for a partition worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub partition: i32,
    pub records_polled: u64,
    pub records_malformed: u64,
    pub events_filtered: u64,
    pub events_duplicate: u64,
    pub events_late_dropped: u64,
    pub lookup_fallbacks: u64,
    pub alerts_emitted: u64,
    pub windows_closed: u64,
    pub documents_written: u64,
    pub documents_dropped: u64,
    pub sink_retries: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub committed_offset: Option<i64>,
    pub watermark_ms: Option<i64>,
}

impl PartitionStats {
    pub fn new(partition: i32) -> Self {
        Self {
            partition,
            ..Default::default()
        }
    }

    /// Fold in a committed batch
    pub fn record_batch(&mut self, summary: &BatchSummary) {
        self.records_polled += summary.records_polled;
        self.records_malformed += summary.records_malformed;
        self.events_filtered += summary.events_filtered;
        self.events_duplicate += summary.events_duplicate;
        self.events_late_dropped += summary.events_late_dropped;
        self.lookup_fallbacks += summary.lookup_fallbacks;
        self.alerts_emitted += summary.alerts_emitted;
        self.windows_closed += summary.windows_closed;
        self.documents_written += summary.documents_written;
        self.documents_dropped += summary.documents_dropped;
        self.sink_retries += summary.sink_retries;
        self.batches_committed += 1;
        self.committed_offset = Some(summary.next_offset);
        if summary.watermark_ms.is_some() {
            self.watermark_ms = summary.watermark_ms;
        }
    }

    pub fn inc_batches_failed(&mut self) {
        self.batches_failed += 1;
    }

    /// Events that passed every gate and reached the aggregators
    pub fn events_accepted(&self) -> u64 {
        self.records_polled
            .saturating_sub(self.records_malformed)
            .saturating_sub(self.events_filtered)
            .saturating_sub(self.events_duplicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_batch_accumulates() {
        let mut stats = PartitionStats::new(3);
        let summary = BatchSummary {
            first_offset: 0,
            next_offset: 10,
            records_polled: 10,
            records_malformed: 1,
            events_filtered: 4,
            events_duplicate: 1,
            watermark_ms: Some(500),
            ..Default::default()
        };
        stats.record_batch(&summary);
        stats.record_batch(&BatchSummary {
            first_offset: 10,
            next_offset: 12,
            records_polled: 2,
            ..Default::default()
        });

        assert_eq!(stats.records_polled, 12);
        assert_eq!(stats.batches_committed, 2);
        assert_eq!(stats.committed_offset, Some(12));
        assert_eq!(stats.watermark_ms, Some(500));
        assert_eq!(stats.events_accepted(), 6);
    }
}
