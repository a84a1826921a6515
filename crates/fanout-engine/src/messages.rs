//! Wire messages carried over the pub/sub transport
//!
//! Four message kinds exist: the request broadcast, the per-node response,
//! and the register/unregister membership broadcasts. Request/response
//! pairing is done entirely via the correlation id; the transport guarantees
//! nothing beyond unordered at-least-once delivery per subscriber.

use bytes::Bytes;
use fanout_store::RemoveTarget;
use fanout_topology::{NodeId, NodeRecord, OperationFamily};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::options::CallOptions;

/// Operation-specific payload of a distributed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestPayload {
    /// Find records matching a condition
    Find {
        /// Condition document
        condition: Value,
    },
    /// Persist entities on every participant
    Save {
        /// Entities to persist
        entities: Vec<Value>,
    },
    /// Remove records by id or condition
    Remove {
        /// What to remove
        target: RemoveTarget,
    },
    /// Apply an update document to matching records
    Update {
        /// Condition document
        condition: Value,
        /// Update document
        update: Value,
    },
    /// Run an aggregation pipeline
    Aggregate {
        /// Pipeline stages
        pipeline: Vec<Value>,
    },
}

impl RequestPayload {
    /// The operation family this payload belongs to
    pub fn operation(&self) -> OperationFamily {
        match self {
            RequestPayload::Find { .. } => OperationFamily::Find,
            RequestPayload::Save { .. } => OperationFamily::Save,
            RequestPayload::Remove { .. } => OperationFamily::Remove,
            RequestPayload::Update { .. } => OperationFamily::Update,
            RequestPayload::Aggregate { .. } => OperationFamily::Aggregate,
        }
    }
}

/// One distributed request, owned by its dispatcher call for the call's lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedRequest {
    /// Unique per call; pairs responses with this request
    pub correlation_id: Uuid,
    /// The node that issued the call and awaits the responses
    pub origin_node_id: NodeId,
    /// Operation family
    pub operation: OperationFamily,
    /// Entity type name
    pub entity: String,
    /// Operation-specific payload
    pub payload: RequestPayload,
    /// Explicit participant subset; `None` is an unaddressed broadcast
    pub target_ids: Option<Vec<NodeId>>,
    /// Call options
    pub options: CallOptions,
}

impl DistributedRequest {
    /// Whether the request explicitly names the given node
    pub fn targets(&self, node_id: &NodeId) -> bool {
        self.target_ids
            .as_ref()
            .is_some_and(|targets| targets.contains(node_id))
    }

    /// Whether the request is an unaddressed broadcast
    pub fn is_broadcast(&self) -> bool {
        self.target_ids.is_none()
    }
}

/// Per-node operation counters attached to a response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseCounters {
    /// Records returned by this node (find/aggregate)
    pub count: u64,
    /// Limit this node applied to its local subset
    pub limit: Option<u64>,
    /// Offset this node applied to its local subset
    pub offset: Option<u64>,
    /// Entities saved on this node
    pub saved: u64,
    /// Entities that failed to save on this node
    pub errored: u64,
    /// Affected-row count for remove/update; `-2` means the local driver
    /// cannot report one
    pub affected: Option<i64>,
}

/// One response from one participant of one call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedResponse {
    /// Correlation id of the request being answered
    pub correlation_id: Uuid,
    /// The node that executed the operation locally
    pub responder_node_id: NodeId,
    /// The origin node this response is addressed to
    pub resp_id: NodeId,
    /// Local results, each record tagged with this node's provenance
    pub results: Vec<Value>,
    /// Failure message if the local store rejected the operation
    pub error: Option<String>,
    /// Operation counters
    pub counters: ResponseCounters,
}

/// Node register broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegister {
    /// The registering node's record, responder policy included
    pub record: NodeRecord,
}

/// Node unregister broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUnregister {
    /// The leaving node's record
    pub record: NodeRecord,
}

/// Encode a wire message as CBOR
pub fn encode<M: Serialize>(message: &M) -> EngineResult<Bytes> {
    let mut buffer = Vec::new();
    ciborium::into_writer(message, &mut buffer)
        .map_err(|e| EngineError::Serialization(format!("Failed to encode message: {e}")))?;
    Ok(Bytes::from(buffer))
}

/// Decode a wire message from CBOR
pub fn decode<M: for<'de> Deserialize<'de>>(payload: &Bytes) -> EngineResult<M> {
    ciborium::from_reader(payload.as_ref())
        .map_err(|e| EngineError::Serialization(format!("Failed to decode message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips_through_cbor() {
        let request = DistributedRequest {
            correlation_id: Uuid::new_v4(),
            origin_node_id: NodeId::from_seed(1),
            operation: OperationFamily::Find,
            entity: "user".to_string(),
            payload: RequestPayload::Find {
                condition: json!({"active": true}),
            },
            target_ids: Some(vec![NodeId::from_seed(2)]),
            options: CallOptions::default(),
        };

        let bytes = encode(&request).unwrap();
        let decoded: DistributedRequest = decode(&bytes).unwrap();
        assert_eq!(decoded.correlation_id, request.correlation_id);
        assert!(decoded.targets(&NodeId::from_seed(2)));
        assert!(!decoded.targets(&NodeId::from_seed(1)));
        assert!(!decoded.is_broadcast());
    }

    #[test]
    fn payload_reports_its_family() {
        let payload = RequestPayload::Update {
            condition: json!({}),
            update: json!({"$set": {"x": 1}}),
        };
        assert_eq!(payload.operation(), OperationFamily::Update);
    }
}
