//! Threshold gates: the amount filter and the alert classifier
//!
//! Both compare the raw (pre-surcharge) amount with strict greater-than.

use crate::event::{Alert, EnrichedEvent, TransactionEvent};

/// Drops events at or below the filter threshold
#[derive(Debug, Clone, Copy)]
pub struct AmountFilter {
    threshold: f64,
}

impl AmountFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn passes(&self, event: &TransactionEvent) -> bool {
        event.amount > self.threshold
    }
}

/// Flags high-value transactions
#[derive(Debug, Clone, Copy)]
pub struct AlertClassifier {
    threshold: f64,
}

impl AlertClassifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(&self, enriched: &EnrichedEvent) -> Option<Alert> {
        let event = &enriched.event;
        if event.amount <= self.threshold {
            return None;
        }
        Some(Alert {
            transaction_id: event.transaction_id.clone(),
            user_id: event.user_id.clone(),
            amount: event.amount,
            reason: format!("High transaction amount (> {})", self.threshold),
            location: enriched.location.clone(),
            timestamp: event.timestamp,
        })
    }
}
