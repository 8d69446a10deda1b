//! Unwindowed running totals per user

use crate::event::UserTotal;
use std::collections::HashMap;

/// All-time amount sum and count per user. Never closes.
#[derive(Debug, Clone, Default)]
pub struct UserTotals {
    totals: HashMap<String, UserTotal>,
}

impl UserTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one accepted event's raw amount and return the updated total
    pub fn update(&mut self, user_id: &str, amount: f64) -> UserTotal {
        let total = self
            .totals
            .entry(user_id.to_string())
            .or_insert_with(|| UserTotal {
                user_id: user_id.to_string(),
                total_transaction_amount: 0.0,
                transaction_count: 0,
            });
        total.total_transaction_amount += amount;
        total.transaction_count += 1;
        total.clone()
    }

    pub fn get(&self, user_id: &str) -> Option<&UserTotal> {
        self.totals.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Totals ordered by user id, for checkpointing
    pub fn snapshot(&self) -> Vec<UserTotal> {
        let mut totals: Vec<UserTotal> = self.totals.values().cloned().collect();
        totals.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        totals
    }

    pub fn from_snapshot(totals: Vec<UserTotal>) -> Self {
        Self {
            totals: totals
                .into_iter()
                .map(|t| (t.user_id.clone(), t))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_accumulates_raw_amounts() {
        let mut totals = UserTotals::new();
        totals.update("u1", 1500.0);
        let total = totals.update("u1", 12000.0);

        assert_eq!(total.total_transaction_amount, 13500.0);
        assert_eq!(total.transaction_count, 2);
        assert!(totals.get("u2").is_none());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut totals = UserTotals::new();
        totals.update("b", 2.0);
        totals.update("a", 1.0);

        let snapshot = totals.snapshot();
        assert_eq!(snapshot[0].user_id, "a");

        let restored = UserTotals::from_snapshot(snapshot);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("b").map(|t| t.transaction_count), Some(1));
    }
}
