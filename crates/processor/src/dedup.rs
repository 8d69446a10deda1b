//! Bounded transaction-id deduplication
//!
//! The filter remembers each accepted `transactionId` together with the
//! stream time it was first seen. Entries older than the retention horizon
//! are evicted, after which a re-arriving id is accepted again. This is a
//! weak guarantee: duplicates are only suppressed within the horizon.
//!
//! Memory is bounded two ways: time-based expiry, and a hard cap on the
//! number of entries that evicts the oldest entry first. Both use a min-heap
//! keyed by first-seen time as the eviction index.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

/// A remembered transaction id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub transaction_id: String,
    /// Stream time in epoch millis at which the id was first accepted
    pub first_seen_at: i64,
}

/// Counters for deduplication decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Number of ids checked
    pub total_checked: u64,
    /// Number of events suppressed as duplicates
    pub duplicates_found: u64,
    /// Entries removed because they aged past the horizon
    pub expired: u64,
    /// Entries removed because the filter was full
    pub capacity_evictions: u64,
}

impl DedupStats {
    /// Ratio of duplicates to checked ids (0.0 to 1.0)
    pub fn duplication_rate(&self) -> f64 {
        if self.total_checked == 0 {
            0.0
        } else {
            self.duplicates_found as f64 / self.total_checked as f64
        }
    }
}

/// Transaction-id filter with a retention horizon
#[derive(Debug, Clone)]
pub struct DedupFilter {
    retention_ms: i64,
    max_entries: usize,
    seen: HashMap<String, i64>,
    /// Exactly one heap entry per live `seen` entry
    eviction_index: BinaryHeap<Reverse<(i64, String)>>,
    stats: DedupStats,
}

impl DedupFilter {
    pub fn new(retention: Duration, max_entries: usize) -> Self {
        Self {
            retention_ms: i64::try_from(retention.as_millis()).unwrap_or(i64::MAX),
            max_entries: max_entries.max(1),
            seen: HashMap::new(),
            eviction_index: BinaryHeap::new(),
            stats: DedupStats::default(),
        }
    }

    /// Returns true the first time `transaction_id` is seen within the horizon.
    ///
    /// `now_ms` is the stream time; within a batch, the first of two records
    /// with the same id (in offset order) wins.
    pub fn accept(&mut self, transaction_id: &str, now_ms: i64) -> bool {
        self.evict_expired(now_ms);
        self.stats.total_checked += 1;

        if self.seen.contains_key(transaction_id) {
            self.stats.duplicates_found += 1;
            return false;
        }

        self.seen.insert(transaction_id.to_string(), now_ms);
        self.eviction_index
            .push(Reverse((now_ms, transaction_id.to_string())));

        while self.seen.len() > self.max_entries {
            match self.eviction_index.pop() {
                Some(Reverse((_, id))) => {
                    self.seen.remove(&id);
                    self.stats.capacity_evictions += 1;
                }
                None => break,
            }
        }
        true
    }

    /// Drop every entry older than the horizon, returning how many were removed
    pub fn evict_expired(&mut self, now_ms: i64) -> usize {
        let mut removed = 0;
        loop {
            let expired = match self.eviction_index.peek() {
                Some(Reverse((first_seen, _))) => {
                    now_ms.saturating_sub(*first_seen) > self.retention_ms
                }
                None => false,
            };
            if !expired {
                break;
            }
            if let Some(Reverse((_, id))) = self.eviction_index.pop() {
                self.seen.remove(&id);
                removed += 1;
            }
        }
        self.stats.expired += removed as u64;
        removed
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.seen.contains_key(transaction_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    /// Entries ordered oldest first, for checkpointing
    pub fn snapshot(&self) -> Vec<DedupEntry> {
        let mut entries: Vec<DedupEntry> = self
            .seen
            .iter()
            .map(|(id, first_seen)| DedupEntry {
                transaction_id: id.clone(),
                first_seen_at: *first_seen,
            })
            .collect();
        entries.sort_by(|a, b| {
            a.first_seen_at
                .cmp(&b.first_seen_at)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        entries
    }

    /// Rebuild a filter from checkpointed entries
    pub fn from_snapshot(retention: Duration, max_entries: usize, entries: Vec<DedupEntry>) -> Self {
        let mut filter = Self::new(retention, max_entries);
        for entry in entries {
            if filter.seen.contains_key(&entry.transaction_id) {
                continue;
            }
            filter
                .eviction_index
                .push(Reverse((entry.first_seen_at, entry.transaction_id.clone())));
            filter.seen.insert(entry.transaction_id, entry.first_seen_at);
        }
        while filter.seen.len() > filter.max_entries {
            match filter.eviction_index.pop() {
                Some(Reverse((_, id))) => {
                    filter.seen.remove(&id);
                }
                None => break,
            }
        }
        filter
    }
}
