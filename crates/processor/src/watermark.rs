//! Event-time watermark for a single partition
//!
//! The watermark trails the maximum observed event timestamp by the allowed
//! lateness. It is recomputed once per batch and never moves backwards:
//!
//! ```text
//! watermark = max(watermark, max_event_ts_in_batch - allowed_lateness)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// A watermark timestamp in milliseconds since epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    pub timestamp: i64,
}

impl Watermark {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    /// The watermark before any event has been observed
    pub fn min() -> Self {
        Self {
            timestamp: i64::MIN,
        }
    }

    pub fn is_min(&self) -> bool {
        self.timestamp == i64::MIN
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Whether everything strictly before `timestamp` is considered complete
    pub fn has_passed(&self, timestamp: i64) -> bool {
        self.timestamp >= timestamp
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::min()
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) if !self.is_min() => write!(f, "Watermark({})", dt),
            _ => write!(f, "Watermark(-inf)"),
        }
    }
}

/// Bounded-lateness watermark tracker
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    allowed_lateness_ms: i64,
    current: Watermark,
}

impl WatermarkTracker {
    pub fn new(allowed_lateness: Duration) -> Self {
        Self {
            allowed_lateness_ms: i64::try_from(allowed_lateness.as_millis()).unwrap_or(i64::MAX),
            current: Watermark::min(),
        }
    }

    /// Resume from a checkpointed watermark
    pub fn with_watermark(allowed_lateness: Duration, current: Watermark) -> Self {
        Self {
            current,
            ..Self::new(allowed_lateness)
        }
    }

    pub fn current(&self) -> Watermark {
        self.current
    }

    /// Advance using the maximum event timestamp seen in a batch.
    ///
    /// Returns the new watermark if it moved forward.
    pub fn advance(&mut self, max_event_ts: i64) -> Option<Watermark> {
        let candidate = Watermark::new(max_event_ts.saturating_sub(self.allowed_lateness_ms));
        if candidate > self.current {
            trace!(from = self.current.timestamp, to = candidate.timestamp, "watermark advanced");
            self.current = candidate;
            Some(candidate)
        } else {
            None
        }
    }
}
