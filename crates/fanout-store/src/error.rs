//! Store error types

use thiserror::Error;

/// Errors produced by a local store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No schema registered for the entity type
    #[error("Unknown entity type '{0}'")]
    UnknownEntity(String),

    /// A condition or update referenced a field the schema does not declare
    #[error("Unknown field '{field}' on entity '{entity}'")]
    UnknownField {
        /// Entity type name
        entity: String,
        /// Offending field name
        field: String,
    },

    /// The condition document is malformed
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// The aggregation pipeline is malformed
    #[error("Invalid pipeline stage: {0}")]
    InvalidPipeline(String),

    /// Other storage failure
    #[error("Store error: {0}")]
    Other(String),
}
