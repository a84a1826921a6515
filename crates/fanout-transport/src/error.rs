//! Transport error types

use thiserror::Error;

/// Errors produced by a pub/sub transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Publishing to the shared bus failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The transport has been shut down
    #[error("Transport closed")]
    Closed,

    /// Invalid transport configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Other transport error
    #[error("Transport error: {0}")]
    Other(String),
}
