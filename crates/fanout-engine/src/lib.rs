//! Distributed fan-out call engine.
//!
//! A cluster of peer nodes shares one broadcast pub/sub bus. Any node can
//! issue a distributed operation (find, save, remove, update, aggregate)
//! against an entity type; the engine resolves the participant set from the
//! membership view, broadcasts one request, lets every participant execute
//! the operation against its local store, and merges the per-node responses
//! into a single result with per-record provenance.
//!
//! [`ClusterNode`] is the composition root; [`DistributedClient`] is the
//! caller-facing handle it hands out.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod merger;
pub mod messages;
pub mod node;
pub mod options;
pub mod responder;
pub mod shaper;
pub mod tags;

pub use client::DistributedClient;
pub use config::{EngineConfig, ResponderConfig};
pub use error::{EngineError, EngineResult};
pub use merger::CallCounters;
pub use node::{ClusterNode, NODE_RECORD_ENTITY, node_record_schema};
pub use options::{CallOptions, OutputMode};
pub use shaper::{CallResult, NodeGroup, ResultEnvelope};

pub use fanout_topology::{
    MembershipView, NodeId, NodeRecord, NodeState, OperationFamily, ResponderPolicy,
};
