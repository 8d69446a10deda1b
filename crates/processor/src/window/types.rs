//! Window types and bounds
//!
//! Bounds are held as epoch milliseconds so window state can be ordered,
//! hashed and checkpointed without going through calendar types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Time bounds of a window, `[start_ms, end_ms)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowBounds {
    /// Start of the window (inclusive)
    pub start_ms: i64,
    /// End of the window (exclusive)
    pub end_ms: i64,
}

impl WindowBounds {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Check if a timestamp falls within this window
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms < self.end_ms
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start_ms)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.end_ms)
    }
}

impl fmt::Display for WindowBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start(), self.end()) {
            (Some(start), Some(end)) => write!(
                f,
                "[{} - {})",
                start.format("%Y-%m-%d %H:%M:%S%.3f"),
                end.format("%Y-%m-%d %H:%M:%S%.3f")
            ),
            _ => write!(f, "[{} - {})", self.start_ms, self.end_ms),
        }
    }
}

/// Identity of a per-user window
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowKey {
    pub user_id: String,
    pub bounds: WindowBounds,
}

impl WindowKey {
    pub fn new(user_id: impl Into<String>, bounds: WindowBounds) -> Self {
        Self {
            user_id: user_id.into(),
            bounds,
        }
    }

    /// Stable sink document id, `userId#windowStartMillis`
    pub fn document_id(&self) -> String {
        format!("{}#{}", self.user_id, self.bounds.start_ms)
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.bounds)
    }
}

/// Running sum and count for one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub key: WindowKey,
    pub sum: f64,
    pub count: u64,
}

impl WindowAggregate {
    pub fn new(key: WindowKey) -> Self {
        Self {
            key,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn add(&mut self, amount: f64) {
        self.sum += amount;
        self.count += 1;
    }

    /// Average amount, or 0.0 for an empty window
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
