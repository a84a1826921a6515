//! Local store abstraction for the fanout engine
//!
//! The storage engine and its condition language are external collaborators;
//! this crate defines only the seam the per-node responder executes against:
//! find/save/remove/update/aggregate over dynamically-typed records, plus the
//! entity schema descriptors the engine needs to tag records on the wire.

pub mod error;
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::StoreError;
pub use schema::{EntitySchema, FieldDescriptor, RelationDescriptor, SchemaRegistry};

/// Options applied by one node to its own local subset.
///
/// Limit and offset are per node, not globally coordinated: each node
/// independently limits/offsets what it returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindOptions {
    /// Maximum number of records to return from this node
    pub limit: Option<u64>,
    /// Records to skip on this node before collecting
    pub offset: Option<u64>,
}

/// What a remove operation targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoveTarget {
    /// Specific records by identifier
    Ids(Vec<Value>),
    /// Every record matching a condition
    Condition(Value),
}

/// Affected-row outcome of a remove or update.
///
/// Some drivers cannot report how many rows a condition-based mutation
/// touched; that is not an error, and the engine reports it as the reserved
/// `-2` sentinel rather than `-1` or a fabricated count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffectedRows {
    /// The driver reported an exact count
    Count(u64),
    /// The driver cannot report a count for this operation
    Unsupported,
}

impl AffectedRows {
    /// Wire representation: a non-negative count, or the `-2` sentinel
    pub fn as_sentinel(self) -> i64 {
        match self {
            AffectedRows::Count(count) => count as i64,
            AffectedRows::Unsupported => -2,
        }
    }
}

/// One saved record together with the identifier this node assigned it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedRow {
    /// The record as stored, identifier included
    pub entity: Value,
    /// The identifier assigned by this node
    pub id: Value,
}

/// A local data store holding one node's independent copy of the schema.
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
    /// Find records matching the condition, honoring per-node limit/offset
    async fn find(
        &self,
        entity: &str,
        condition: &Value,
        options: &FindOptions,
    ) -> Result<Vec<Value>, StoreError>;

    /// Find the first record matching the condition
    async fn find_one(&self, entity: &str, condition: &Value) -> Result<Option<Value>, StoreError>;

    /// Persist entities, assigning identifiers from this node's scheme
    async fn save(&self, entity: &str, entities: Vec<Value>) -> Result<Vec<SavedRow>, StoreError>;

    /// Remove records by id or condition
    async fn remove(&self, entity: &str, target: RemoveTarget) -> Result<AffectedRows, StoreError>;

    /// Apply an update document to every record matching the condition
    async fn update(
        &self,
        entity: &str,
        condition: &Value,
        update: &Value,
    ) -> Result<AffectedRows, StoreError>;

    /// Run a full aggregation pipeline against this node's local subset
    async fn aggregate(&self, entity: &str, pipeline: &[Value]) -> Result<Vec<Value>, StoreError>;

    /// Schema of the entity type, used to tag records with their declared name
    fn schema(&self, entity: &str) -> Option<Arc<EntitySchema>>;
}
