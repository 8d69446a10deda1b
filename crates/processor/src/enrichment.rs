//! Enrichment stage
//!
//! Attaches a location derived from the event's IP address and the
//! surcharged `adjustedAmount`. The location lookup is an injected capability
//! with a hard per-call deadline; any failure or timeout falls back to
//! [`UNKNOWN_LOCATION`] so one slow lookup never stalls the partition.

use crate::error::LookupError;
use crate::event::{EnrichedEvent, TransactionEvent};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Location used when the lookup fails or times out
pub const UNKNOWN_LOCATION: &str = "Unknown Location";

/// Resolves an IP address to a location
#[async_trait]
pub trait LocationLookup: Send + Sync {
    async fn lookup(&self, ip_address: &str) -> Result<String, LookupError>;
}

/// Lookup that answers the same location for every address
#[derive(Debug, Clone)]
pub struct StaticLocationLookup {
    location: String,
}

impl StaticLocationLookup {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

impl Default for StaticLocationLookup {
    fn default() -> Self {
        Self::new(UNKNOWN_LOCATION)
    }
}

#[async_trait]
impl LocationLookup for StaticLocationLookup {
    async fn lookup(&self, _ip_address: &str) -> Result<String, LookupError> {
        Ok(self.location.clone())
    }
}

/// Lookup backed by a synchronous closure
pub struct FnLocationLookup<F> {
    f: F,
}

impl<F> FnLocationLookup<F>
where
    F: Fn(&str) -> Result<String, LookupError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnLocationLookup<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLocationLookup").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> LocationLookup for FnLocationLookup<F>
where
    F: Fn(&str) -> Result<String, LookupError> + Send + Sync,
{
    async fn lookup(&self, ip_address: &str) -> Result<String, LookupError> {
        (self.f)(ip_address)
    }
}

/// Applies location lookup and surcharge to decoded events
#[derive(Clone)]
pub struct Enricher {
    lookup: Arc<dyn LocationLookup>,
    surcharge_factor: f64,
    timeout: Duration,
}

impl fmt::Debug for Enricher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enricher")
            .field("surcharge_factor", &self.surcharge_factor)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Enricher {
    pub fn new(lookup: Arc<dyn LocationLookup>, surcharge_factor: f64, timeout: Duration) -> Self {
        Self {
            lookup,
            surcharge_factor,
            timeout,
        }
    }

    /// Enrich an event, falling back to [`UNKNOWN_LOCATION`] on lookup failure
    pub async fn enrich(&self, event: TransactionEvent) -> EnrichedEvent {
        self.enrich_detailed(event).await.0
    }

    /// Like [`enrich`](Self::enrich), also returning the lookup error that
    /// triggered a fallback, if any
    pub async fn enrich_detailed(&self, event: TransactionEvent) -> (EnrichedEvent, Option<LookupError>) {
        let result = match tokio::time::timeout(self.timeout, self.lookup.lookup(&event.ip_address)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout {
                ip: event.ip_address.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };

        let (location, error) = match result {
            Ok(location) => (location, None),
            Err(e) => {
                warn!(
                    transaction_id = %event.transaction_id,
                    error = %e,
                    "location lookup failed, using fallback"
                );
                (UNKNOWN_LOCATION.to_string(), Some(e))
            }
        };

        let adjusted_amount = event.amount * self.surcharge_factor;
        (
            EnrichedEvent {
                event,
                location,
                adjusted_amount,
            },
            error,
        )
    }
}
