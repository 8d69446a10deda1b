//! Windowing module for stream processing
//!
//! Tumbling windows: fixed-size, non-overlapping, aligned to the epoch. Each
//! event belongs to exactly one window per user.
//!
//! ```text
//! Time:     0----5----10---15---20---25---30
//! Windows:  [----][----][----][----][----]
//! ```
//!
//! A window closes when the watermark (maximum observed event time minus the
//! allowed lateness) reaches its end. Closed windows are emitted once and
//! never reopened.

pub mod aggregator;
pub mod assigner;
pub mod types;

pub use aggregator::{Assignment, WindowSnapshot, WindowedAggregator};
pub use assigner::TumblingWindowAssigner;
pub use types::{WindowAggregate, WindowBounds, WindowKey};
