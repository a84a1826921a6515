//! Node membership records

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node_id::NodeId;
use crate::policy::ResponderPolicy;

/// Lifecycle state of one membership record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Created but not yet announced
    Idle,
    /// Announced via a register broadcast
    Register,
    /// Left the cluster via an unregister broadcast
    Unregister,
}

/// One record per cluster member.
///
/// Records are created on a register broadcast and mutated on state
/// transitions. They are never physically deleted while the cluster runs; an
/// unregistered node keeps its record with `finished_at` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Stable, unique node id
    pub node_id: NodeId,
    /// Host the node process runs on
    pub hostname: String,
    /// Machine identifier (distinguishes nodes sharing a hostname)
    pub machine_id: String,
    /// Lifecycle state
    pub state: NodeState,
    /// When the node registered
    pub started_at: DateTime<Utc>,
    /// When the node unregistered, if it has
    pub finished_at: Option<DateTime<Utc>>,
    /// Responder policy advertised by the node
    pub policy: ResponderPolicy,
    /// Opaque extension payloads contributed by other subsystems
    #[serde(default)]
    pub contexts: HashMap<String, serde_json::Value>,
}

impl NodeRecord {
    /// Create a fresh record in the `Idle` state
    pub fn new(node_id: NodeId, hostname: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self {
            node_id,
            hostname: hostname.into(),
            machine_id: machine_id.into(),
            state: NodeState::Idle,
            started_at: Utc::now(),
            finished_at: None,
            policy: ResponderPolicy::default(),
            contexts: HashMap::new(),
        }
    }

    /// Set the responder policy advertised with this record
    pub fn with_policy(mut self, policy: ResponderPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether the node currently participates in the cluster
    pub fn is_active(&self) -> bool {
        self.state == NodeState::Register
    }
}
