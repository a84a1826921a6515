//! Membership view consulted by the request dispatcher

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::node_id::NodeId;
use crate::policy::OperationFamily;
use crate::record::{NodeRecord, NodeState};

/// Last-known snapshot of cluster membership.
///
/// Reads never block on in-flight writes beyond the short critical section of
/// the snapshot lock; the view always answers from the last applied state.
/// Mutation happens only through the register/unregister broadcast handlers,
/// both of which are idempotent.
#[derive(Debug, Default, Clone)]
pub struct MembershipView {
    nodes: Arc<RwLock<HashMap<NodeId, NodeRecord>>>,
}

impl MembershipView {
    /// Create an empty view
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a register broadcast.
    ///
    /// A duplicate register for an already-known id is a no-op besides
    /// refreshing `started_at` and the advertised policy.
    pub fn apply_register(&self, mut record: NodeRecord) {
        record.state = NodeState::Register;
        record.finished_at = None;

        let mut nodes = self.nodes.write();
        match nodes.get_mut(&record.node_id) {
            Some(existing) if existing.is_active() => {
                debug!("Duplicate register for node {}, refreshing", record.node_id);
                existing.started_at = record.started_at;
                existing.policy = record.policy;
            }
            _ => {
                info!("Node {} registered", record.node_id);
                nodes.insert(record.node_id.clone(), record);
            }
        }
    }

    /// Apply an unregister broadcast.
    ///
    /// The record stays in the view with `finished_at` set; membership records
    /// are never physically deleted while the cluster runs.
    pub fn apply_unregister(&self, node_id: &NodeId) {
        let mut nodes = self.nodes.write();
        if let Some(record) = nodes.get_mut(node_id) {
            if record.state != NodeState::Unregister {
                info!("Node {} unregistered", node_id);
                record.state = NodeState::Unregister;
                record.finished_at = Some(Utc::now());
            }
        } else {
            debug!("Unregister for unknown node {}", node_id);
        }
    }

    /// Ids of all currently registered nodes, sorted for determinism
    pub fn list_active(&self) -> Vec<NodeId> {
        let nodes = self.nodes.read();
        let mut active: Vec<NodeId> = nodes
            .values()
            .filter(|record| record.is_active())
            .map(|record| record.node_id.clone())
            .collect();
        active.sort();
        active
    }

    /// Whether the node is registered at all
    pub fn is_active(&self, node_id: &NodeId) -> bool {
        self.nodes
            .read()
            .get(node_id)
            .is_some_and(NodeRecord::is_active)
    }

    /// Whether the node's responder answers unaddressed broadcasts for the family
    pub fn is_participant(&self, node_id: &NodeId, family: OperationFamily) -> bool {
        self.nodes
            .read()
            .get(node_id)
            .is_some_and(|record| record.is_active() && record.policy.serves_broadcast(family))
    }

    /// Snapshot of one node's record
    pub fn record(&self, node_id: &NodeId) -> Option<NodeRecord> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Snapshot of every known record, registered or not
    pub fn all_records(&self) -> Vec<NodeRecord> {
        self.nodes.read().values().cloned().collect()
    }
}
