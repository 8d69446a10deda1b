//! Event decoding and validation
//!
//! Raw broker payloads are UTF-8 JSON objects with five required fields:
//! `transactionId`, `userId`, `transactionAmount`, `ipAddress` and
//! `timestamp`. The timestamp is accepted as an RFC 3339 string, a naive
//! ISO-8601 string (interpreted as UTC), or an integer count of
//! milliseconds since the epoch.

use crate::error::{DecodeError, DecodeResult};
use crate::event::TransactionEvent;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Decodes raw payloads into [`TransactionEvent`]s
#[derive(Debug, Clone, Default)]
pub struct EventDecoder;

impl EventDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode and validate a single payload
    pub fn decode(&self, payload: &[u8]) -> DecodeResult<TransactionEvent> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        let obj = value
            .as_object()
            .ok_or_else(|| DecodeError::InvalidJson("payload is not a JSON object".to_string()))?;

        let transaction_id = required_string(obj, "transactionId")?;
        let user_id = required_string(obj, "userId")?;
        let amount = required_amount(obj)?;
        let ip_address = required_field(obj, "ipAddress")?
            .as_str()
            .ok_or_else(|| DecodeError::InvalidField {
                field: "ipAddress",
                reason: "expected a string".to_string(),
            })?
            .to_string();
        let timestamp = parse_timestamp(required_field(obj, "timestamp")?)?;

        Ok(TransactionEvent {
            transaction_id,
            user_id,
            amount,
            ip_address,
            timestamp,
        })
    }
}

fn required_field<'a>(obj: &'a Map<String, Value>, field: &'static str) -> DecodeResult<&'a Value> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(DecodeError::MissingField { field }),
        Some(v) => Ok(v),
    }
}

/// Identity fields must be non-empty strings
fn required_string(obj: &Map<String, Value>, field: &'static str) -> DecodeResult<String> {
    let s = required_field(obj, field)?
        .as_str()
        .ok_or_else(|| DecodeError::InvalidField {
            field,
            reason: "expected a string".to_string(),
        })?;

    if s.trim().is_empty() {
        return Err(DecodeError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(s.to_string())
}

fn required_amount(obj: &Map<String, Value>) -> DecodeResult<f64> {
    let field = "transactionAmount";
    let amount = required_field(obj, field)?
        .as_f64()
        .ok_or_else(|| DecodeError::InvalidField {
            field,
            reason: "expected a number".to_string(),
        })?;

    if !amount.is_finite() {
        return Err(DecodeError::InvalidField {
            field,
            reason: "must be finite".to_string(),
        });
    }
    if amount < 0.0 {
        return Err(DecodeError::InvalidField {
            field,
            reason: format!("must be non-negative, got {}", amount),
        });
    }
    Ok(amount)
}

fn parse_timestamp(value: &Value) -> DecodeResult<DateTime<Utc>> {
    let field = "timestamp";
    match value {
        Value::String(s) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts.with_timezone(&Utc));
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(|| DecodeError::InvalidField {
                    field,
                    reason: format!("unparsable date '{}'", s),
                })
        }
        Value::Number(n) => {
            let millis = n.as_i64().ok_or_else(|| DecodeError::InvalidField {
                field,
                reason: "epoch timestamp must be an integer number of milliseconds".to_string(),
            })?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| DecodeError::InvalidField {
                    field,
                    reason: format!("epoch millis {} out of range", millis),
                })
        }
        _ => Err(DecodeError::InvalidField {
            field,
            reason: "expected a string or integer".to_string(),
        }),
    }
}
