//! Window assigners

use super::types::WindowBounds;
use std::time::Duration;

/// Tumbling window assigner
///
/// Creates fixed-size, non-overlapping windows aligned to the epoch. Each
/// event is assigned to exactly one window based on its timestamp.
///
/// # Example
/// ```text
/// Window size: 5 seconds
/// Event at timestamp 7 -> Window [5, 10)
/// Event at timestamp 12 -> Window [10, 15)
/// ```
#[derive(Debug, Clone)]
pub struct TumblingWindowAssigner {
    size_ms: i64,
}

impl TumblingWindowAssigner {
    /// A zero size is treated as one millisecond
    pub fn new(size: Duration) -> Self {
        let size_ms = i64::try_from(size.as_millis()).unwrap_or(i64::MAX).max(1);
        Self { size_ms }
    }

    pub fn size_ms(&self) -> i64 {
        self.size_ms
    }

    /// Window containing `timestamp_ms`
    pub fn assign(&self, timestamp_ms: i64) -> WindowBounds {
        let start = timestamp_ms - timestamp_ms.rem_euclid(self.size_ms);
        WindowBounds::new(start, start.saturating_add(self.size_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tumbling_window_assignment() {
        let assigner = TumblingWindowAssigner::new(Duration::from_millis(1000));

        // Event at 500ms -> Window [0, 1000)
        assert_eq!(assigner.assign(500), WindowBounds::new(0, 1000));

        // Event at 1500ms -> Window [1000, 2000)
        assert_eq!(assigner.assign(1500), WindowBounds::new(1000, 2000));

        // Event exactly at window boundary -> Next window
        assert_eq!(assigner.assign(2000), WindowBounds::new(2000, 3000));
    }

    #[test]
    fn test_negative_timestamps_align_down() {
        let assigner = TumblingWindowAssigner::new(Duration::from_millis(1000));
        assert_eq!(assigner.assign(-1), WindowBounds::new(-1000, 0));
        assert_eq!(assigner.assign(-1000), WindowBounds::new(-1000, 0));
    }

    #[test]
    fn test_five_minute_windows() {
        let assigner = TumblingWindowAssigner::new(Duration::from_secs(300));
        let bounds = assigner.assign(1_704_067_399_999);
        assert_eq!(bounds.start_ms, 1_704_067_200_000);
        assert_eq!(bounds.end_ms, 1_704_067_500_000);
    }
}
