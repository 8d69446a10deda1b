//! Per-user tumbling window aggregation
//!
//! Each `(userId, windowStart)` window is Open while accumulating and Closed
//! once the watermark reaches its end. Closing emits the aggregate exactly
//! once and frees its memory; a closed window is never reopened, and events
//! that would land in one are reported as late.

use super::assigner::TumblingWindowAssigner;
use super::types::{WindowAggregate, WindowKey};
use crate::watermark::{Watermark, WatermarkTracker};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::debug;

/// Result of offering an event to the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Event counted into an open window
    Accepted(WindowKey),
    /// The event's window already closed; nothing was recorded
    Late {
        key: WindowKey,
        watermark: Watermark,
    },
}

/// Checkpointable aggregator state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub watermark: Watermark,
    pub open: Vec<WindowAggregate>,
}

/// Windowed sum/count aggregator driven by an event-time watermark
#[derive(Debug, Clone)]
pub struct WindowedAggregator {
    assigner: TumblingWindowAssigner,
    tracker: WatermarkTracker,
    open: HashMap<WindowKey, WindowAggregate>,
    /// Open windows ordered by end time, for closing
    close_index: BTreeSet<(i64, WindowKey)>,
}

impl WindowedAggregator {
    pub fn new(size: Duration, allowed_lateness: Duration) -> Self {
        Self {
            assigner: TumblingWindowAssigner::new(size),
            tracker: WatermarkTracker::new(allowed_lateness),
            open: HashMap::new(),
            close_index: BTreeSet::new(),
        }
    }

    pub fn from_snapshot(size: Duration, allowed_lateness: Duration, snapshot: WindowSnapshot) -> Self {
        let mut aggregator = Self {
            assigner: TumblingWindowAssigner::new(size),
            tracker: WatermarkTracker::with_watermark(allowed_lateness, snapshot.watermark),
            open: HashMap::new(),
            close_index: BTreeSet::new(),
        };
        for aggregate in snapshot.open {
            aggregator
                .close_index
                .insert((aggregate.key.bounds.end_ms, aggregate.key.clone()));
            aggregator.open.insert(aggregate.key.clone(), aggregate);
        }
        aggregator
    }

    pub fn watermark(&self) -> Watermark {
        self.tracker.current()
    }

    pub fn open_windows(&self) -> usize {
        self.open.len()
    }

    pub fn get(&self, key: &WindowKey) -> Option<&WindowAggregate> {
        self.open.get(key)
    }

    /// Add an accepted event's amount to its window
    pub fn add(&mut self, user_id: &str, timestamp_ms: i64, amount: f64) -> Assignment {
        let key = WindowKey::new(user_id, self.assigner.assign(timestamp_ms));
        let watermark = self.tracker.current();

        if watermark.has_passed(key.bounds.end_ms) {
            return Assignment::Late { key, watermark };
        }

        if !self.open.contains_key(&key) {
            self.close_index.insert((key.bounds.end_ms, key.clone()));
            self.open.insert(key.clone(), WindowAggregate::new(key.clone()));
        }
        if let Some(aggregate) = self.open.get_mut(&key) {
            aggregate.add(amount);
        }
        Assignment::Accepted(key)
    }

    /// Advance the watermark with a batch's maximum event time and close
    /// every window it has passed, ordered by end time then key.
    pub fn advance(&mut self, max_event_ts: i64) -> Vec<WindowAggregate> {
        self.tracker.advance(max_event_ts);
        let watermark = self.tracker.current();

        let mut closed = Vec::new();
        loop {
            let due = match self.close_index.first() {
                Some((end_ms, _)) => watermark.has_passed(*end_ms),
                None => false,
            };
            if !due {
                break;
            }
            if let Some((_, key)) = self.close_index.pop_first() {
                if let Some(aggregate) = self.open.remove(&key) {
                    closed.push(aggregate);
                }
            }
        }

        if !closed.is_empty() {
            debug!(
                watermark = watermark.timestamp,
                closed = closed.len(),
                open = self.open.len(),
                "closed windows"
            );
        }
        closed
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let open = self
            .close_index
            .iter()
            .filter_map(|(_, key)| self.open.get(key).cloned())
            .collect();
        WindowSnapshot {
            watermark: self.tracker.current(),
            open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> WindowedAggregator {
        WindowedAggregator::new(Duration::from_millis(1000), Duration::from_millis(100))
    }

    #[test]
    fn test_window_closes_when_watermark_passes_end() {
        let mut agg = aggregator();
        assert!(matches!(agg.add("u1", 100, 10.0), Assignment::Accepted(_)));
        assert!(matches!(agg.add("u1", 900, 5.0), Assignment::Accepted(_)));

        // watermark = 1050 - 100 = 950 < 1000
        assert!(agg.advance(1050).is_empty());
        assert_eq!(agg.open_windows(), 1);

        // watermark = 1100 - 100 = 1000 >= end
        let closed = agg.advance(1100);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].sum, 15.0);
        assert_eq!(closed[0].count, 2);
        assert_eq!(agg.open_windows(), 0);
    }

    #[test]
    fn test_windows_are_per_user() {
        let mut agg = aggregator();
        agg.add("u1", 100, 1.0);
        agg.add("u2", 200, 2.0);
        agg.add("u1", 1200, 4.0);

        let closed = agg.advance(1200);
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].key.user_id, "u1");
        assert_eq!(closed[1].key.user_id, "u2");
        assert_eq!(agg.open_windows(), 1);
    }

    #[test]
    fn test_late_event_not_recorded() {
        let mut agg = aggregator();
        agg.add("u1", 100, 10.0);
        let closed = agg.advance(5000);
        assert_eq!(closed.len(), 1);

        match agg.add("u1", 500, 99.0) {
            Assignment::Late { key, watermark } => {
                assert_eq!(key.bounds.end_ms, 1000);
                assert_eq!(watermark.timestamp, 4900);
            }
            other => panic!("expected late, got {:?}", other),
        }
        assert_eq!(agg.open_windows(), 0);
        assert!(agg.advance(6000).is_empty());
    }

    #[test]
    fn test_out_of_order_within_lateness_accepted() {
        let mut agg = aggregator();
        agg.add("u1", 1050, 1.0);
        agg.advance(1050);
        // watermark 950, window [0, 1000) still open
        assert!(matches!(agg.add("u1", 999, 2.0), Assignment::Accepted(_)));
    }

    #[test]
    fn test_snapshot_round_trip_keeps_open_windows() {
        let mut agg = aggregator();
        agg.add("u1", 100, 10.0);
        agg.add("u2", 1500, 7.0);
        agg.advance(600);

        let snapshot = agg.snapshot();
        let mut restored = WindowedAggregator::from_snapshot(
            Duration::from_millis(1000),
            Duration::from_millis(100),
            snapshot.clone(),
        );
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.watermark().timestamp, 500);

        restored.add("u1", 200, 5.0);
        let closed = restored.advance(1100);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].sum, 15.0);
    }
}
