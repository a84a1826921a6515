//! Provenance tags attached to every merged record
//!
//! Invariant: every record in a merged result carries the id of the node
//! that actually produced it; no record is ever attributed to the wrong node.

use fanout_store::EntitySchema;
use fanout_topology::NodeId;
use serde_json::Value;

/// Origin node of the record
pub const NODE_ID: &str = "__nodeId__";
/// Declared entity type name
pub const CLASS: &str = "__class__";
/// Schema family identifier
pub const REGISTRY: &str = "__registry__";
/// Per-node assigned identifiers on a merged save record
pub const IDS: &str = "__ids__";
/// Identifier one node assigned on save, replaced by [`IDS`] at merge time
pub const ASSIGNED_ID: &str = "__id__";

/// Tag a record with its origin node and entity metadata
pub fn annotate(record: &mut Value, node_id: &NodeId, schema: &EntitySchema) {
    if let Some(object) = record.as_object_mut() {
        object.insert(NODE_ID.to_string(), Value::String(node_id.to_string()));
        object.insert(CLASS.to_string(), Value::String(schema.name.clone()));
        object.insert(REGISTRY.to_string(), Value::String(schema.registry.clone()));
    }
}

/// Remove provenance tags, leaving the bare value
pub fn strip(record: &mut Value) {
    if let Some(object) = record.as_object_mut() {
        object.remove(NODE_ID);
        object.remove(CLASS);
        object.remove(REGISTRY);
    }
}

/// Origin node id of a tagged record
pub fn node_id_of(record: &Value) -> Option<NodeId> {
    record
        .get(NODE_ID)
        .and_then(Value::as_str)
        .map(NodeId::new)
}
