//! Error types for the NimsForest core

use thiserror::Error;

/// Errors that can occur anywhere in the core runtime.
///
/// Variants correspond to the error taxonomy kinds, not to individual
/// components: the same `RevisionMismatch` surfaces from Soil directly or
/// from a Decomposer retry, the same `TransportError` surfaces from Wind,
/// River, Humus, or Soil's broker calls.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A Leaf, Compost, or River append violated its schema.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Soil key missing where required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict on a Soil key.
    #[error("revision mismatch for '{entity}': expected {expected}, found {actual}")]
    RevisionMismatch {
        entity: String,
        expected: u64,
        actual: u64,
    },

    /// Broker I/O failure (connect, publish, subscribe, ack, fetch).
    #[error("transport error: {0}")]
    TransportError(String),

    /// Append refused because the stream's size/age policy would be violated.
    #[error("retention exceeded: {0}")]
    RetentionExceeded(String),

    /// Operation terminated via a cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Unexpected, not recoverable locally.
    #[error("internal error: {0}")]
    InternalError(String),

    /// Serialization/deserialization failure — surfaces as `InvalidInput`
    /// at the Leaf/Compost boundary but is kept distinct here because it
    /// carries a `serde_json::Error` rather than a free-form string.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// True for errors the caller should not retry (spec §7: `InvalidInput`
    /// is surfaced to the caller and the framework never retries it).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidInput(_) | CoreError::Serialization(_)
        )
    }
}
