//! Cluster membership types for the fanout engine
//!
//! This crate provides:
//! - Node identity types (`NodeId`, `NodeRecord`)
//! - The membership view consulted by the request dispatcher
//! - The per-node responder policy (operation family allow-list)

pub mod node_id;
pub mod policy;
pub mod record;
pub mod view;

pub use node_id::NodeId;
pub use policy::{OperationFamily, ResponderPolicy};
pub use record::{NodeRecord, NodeState};
pub use view::MembershipView;
