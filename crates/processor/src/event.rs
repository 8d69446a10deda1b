//! Domain records flowing through the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded transaction change event. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub transaction_id: String,
    pub user_id: String,
    #[serde(rename = "transactionAmount")]
    pub amount: f64,
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
}

impl TransactionEvent {
    pub fn new(
        transaction_id: impl Into<String>,
        user_id: impl Into<String>,
        amount: f64,
        ip_address: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            user_id: user_id.into(),
            amount,
            ip_address: ip_address.into(),
            timestamp,
        }
    }

    /// Event time in milliseconds since the epoch
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// An event with its derived fields attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEvent {
    #[serde(flatten)]
    pub event: TransactionEvent,
    pub location: String,
    pub adjusted_amount: f64,
}

/// High-risk transaction flagged by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
    pub reason: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
}

/// All-time running aggregate for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTotal {
    pub user_id: String,
    pub total_transaction_amount: f64,
    pub transaction_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_enriched_event_serializes_flat() {
        let event = TransactionEvent::new(
            "t1",
            "u1",
            1500.0,
            "10.0.0.1",
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        );
        let enriched = EnrichedEvent {
            event,
            location: "Unknown Location".to_string(),
            adjusted_amount: 1650.0,
        };

        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(value["transactionId"], "t1");
        assert_eq!(value["transactionAmount"], 1500.0);
        assert_eq!(value["ipAddress"], "10.0.0.1");
        assert_eq!(value["adjustedAmount"], 1650.0);
        assert_eq!(value["location"], "Unknown Location");
    }
}
