//! Node ID type for the fanout cluster

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, unique identifier of one cluster node.
///
/// Node ids are plain strings chosen at bootstrap time (host name, instance
/// id, ...). They order lexicographically, which the result merger relies on
/// when synthesizing aggregate error messages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a deterministic node id from a seed (useful for tests)
    pub fn from_seed(seed: u8) -> Self {
        Self(format!("node-{seed}"))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
