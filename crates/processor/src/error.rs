//! Error types for the stream processor
//!
//! Each stage owns a narrow error enum so the coordinator can decide, per
//! variant, whether a failure is contained to one record, retried, or fatal
//! for the partition worker.

use thiserror::Error;

/// Main processor error type
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Malformed input record
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Enrichment lookup errors
    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Sink write errors
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Offset store and checkpoint errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Broker read errors
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Configuration errors
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessorError {
    /// Build a configuration error from a message
    pub fn config(message: impl Into<String>) -> Self {
        ProcessorError::Configuration {
            source: message.into().into(),
        }
    }
}

/// A raw broker record could not be turned into a transaction event
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is not a UTF-8 JSON object
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    /// A required field is absent or null
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    /// A field is present but has the wrong type or an invalid value
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Location lookup failures. Always recovered with a fallback value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("lookup for {ip} timed out after {timeout_ms}ms")]
    Timeout { ip: String, timeout_ms: u64 },

    #[error("lookup for {ip} failed: {reason}")]
    Failed { ip: String, reason: String },
}

/// Sink write errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// Network or 5xx-class failure; safe to retry
    #[error("transient sink failure: {0}")]
    Transient(String),

    /// The sink rejected the request as a whole (auth, malformed request)
    #[error("permanent sink failure: {0}")]
    Permanent(String),

    /// The sink call did not complete within its deadline
    #[error("sink request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Retry budget spent while documents were still pending
    #[error("sink retries exhausted after {attempts} attempts, {pending} documents pending: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        pending: usize,
        last_error: String,
    },
}

impl SinkError {
    /// Whether the failed batch may be replayed later without operator action
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SinkError::Permanent(_))
    }
}

/// Offset store and checkpoint errors
#[derive(Error, Debug)]
pub enum StateError {
    /// State backend storage error
    #[error("storage error in {backend_type}: {details}")]
    StorageError {
        backend_type: String,
        details: String,
    },

    /// State serialization failed
    #[error("state serialization failed for key '{key}': {reason}")]
    SerializationFailed { key: String, reason: String },

    /// State deserialization failed
    #[error("state deserialization failed for key '{key}': {reason}")]
    DeserializationFailed { key: String, reason: String },

    /// A commit would move a partition's offset backwards
    #[error("offset regression on partition {partition}: committed {committed}, attempted {attempted}")]
    OffsetRegression {
        partition: i32,
        committed: i64,
        attempted: i64,
    },
}

/// Broker read errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to poll partition {partition} at offset {offset}: {message}")]
    Poll {
        partition: i32,
        offset: i64,
        message: String,
    },

    #[error("failed to connect to broker {broker}: {message}")]
    Connection { broker: String, message: String },

    #[error("partition {partition} does not exist")]
    PartitionNotFound { partition: i32 },
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Result type alias for decode operations
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Result type alias for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Result type alias for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Result type alias for source operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}
