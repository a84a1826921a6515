//! Per-call options and output modes

use std::time::Duration;

use fanout_topology::NodeId;
use serde::{Deserialize, Serialize};

/// Shape of the merged result returned to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Flat sequence as merged
    #[default]
    Array,
    /// Grouped by responder node id, each group with its own sub-count
    Map,
    /// Same as array; kept as an explicit mode for caller clarity since the
    /// `__nodeId__` tag is always present in this design
    EmbedNodeId,
    /// Provenance tags stripped, bare values returned
    OnlyValue,
    /// Raw per-node responses verbatim, bypassing error synthesis
    Responses,
}

/// Options of one distributed call.
///
/// Limit and offset are applied per node: each participant independently
/// limits/offsets its own local subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallOptions {
    /// Per-node record limit for find
    pub limit: Option<u64>,
    /// Per-node record offset for find
    pub offset: Option<u64>,
    /// Preferred single node for find; short-circuits the call to that node
    /// and returns a single best match instead of a collection
    pub hint: Option<NodeId>,
    /// Exclude the local node from the participant set
    pub skip_local: bool,
    /// Explicit participant subset; empty means "all active nodes"
    pub target_ids: Vec<NodeId>,
    /// Result shape
    pub output_mode: OutputMode,
    /// Per-call timeout override
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Options targeting an explicit set of nodes
    pub fn targets(ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            target_ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Set the per-node limit
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the per-node offset
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Prefer a single node for find
    pub fn with_hint(mut self, hint: NodeId) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Exclude the local node
    pub fn without_local(mut self) -> Self {
        self.skip_local = true;
        self
    }

    /// Select the result shape
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    /// Override the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
