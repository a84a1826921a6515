//! Engine configuration

use std::time::Duration;

use fanout_topology::{NodeId, ResponderPolicy};
use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stable id of this node
    pub node_id: NodeId,

    /// Host the node runs on, announced on register
    pub hostname: String,

    /// Machine identifier, announced on register
    pub machine_id: String,

    /// Default per-call timeout when the caller does not set one
    pub default_timeout: Duration,

    /// Local responder configuration
    pub responder: ResponderConfig,
}

impl EngineConfig {
    /// Configuration with defaults for the given node id
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            hostname: "localhost".to_string(),
            machine_id: "local".to_string(),
            default_timeout: Duration::from_secs(5),
            responder: ResponderConfig::default(),
        }
    }

    /// Override the default per-call timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Override the responder configuration
    pub fn with_responder(mut self, responder: ResponderConfig) -> Self {
        self.responder = responder;
        self
    }
}

/// Local responder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Maximum distributed requests executing against the local store at
    /// once. The default of 1 serializes distributed traffic per node.
    pub concurrency: usize,

    /// Which operation families this node's responder serves
    pub policy: ResponderPolicy,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            policy: ResponderPolicy::default(),
        }
    }
}
