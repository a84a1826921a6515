//! Error types for the fanout engine

use fanout_transport::TransportError;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Main error type for distributed calls
#[derive(Debug, Error)]
pub enum EngineError {
    /// Zero expected nodes answered before the timeout
    #[error("No responses arrived")]
    NoResponses,

    /// One or more nodes reported failure.
    ///
    /// The message is one `"{nodeId}: {message}"` line per failing node,
    /// sorted lexicographically by node id and newline-joined. No partial
    /// success data is attached.
    #[error("{message}")]
    Aggregate {
        /// Sorted, newline-joined per-node failure lines
        message: String,
    },

    /// Publishing to the transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A wire message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No schema is registered for the entity type
    #[error("Unknown entity type '{0}'")]
    UnknownEntity(String),
}
