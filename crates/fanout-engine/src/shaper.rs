//! Response shaper
//!
//! Post-processes a merged result into the externally observable shape the
//! caller selected per call.

use std::collections::BTreeMap;

use fanout_topology::NodeId;
use serde_json::Value;
use tracing::warn;

use crate::merger::{CallCounters, MergedResult};
use crate::messages::DistributedResponse;
use crate::options::OutputMode;
use crate::tags;

/// Records one node contributed, with that node's sub-count
#[derive(Debug, Clone, Default)]
pub struct NodeGroup {
    /// Records from this node
    pub records: Vec<Value>,
    /// Sub-count of this group
    pub count: u64,
}

/// Shaped payload of one distributed call
#[derive(Debug, Clone)]
pub enum CallResult {
    /// Flat sequence as merged, provenance tags present
    Array(Vec<Value>),
    /// Grouped by responder node id
    Map(BTreeMap<NodeId, NodeGroup>),
    /// Bare values with provenance tags stripped
    Values(Vec<Value>),
    /// Per-node affected-row counts (remove/update)
    Affected(BTreeMap<NodeId, i64>),
    /// Raw per-node responses
    Responses(Vec<DistributedResponse>),
}

/// The value returned to the caller: shaped records plus call-level counters
#[derive(Debug, Clone)]
pub struct ResultEnvelope {
    /// Shaped payload
    pub result: CallResult,
    /// Call-level counters
    pub counters: CallCounters,
}

impl ResultEnvelope {
    /// Records of an `Array`/`Values` shaped result; empty for other shapes
    pub fn records(&self) -> &[Value] {
        match &self.result {
            CallResult::Array(records) | CallResult::Values(records) => records,
            _ => &[],
        }
    }

    /// Per-node affected counts of a remove/update result
    pub fn affected(&self) -> Option<&BTreeMap<NodeId, i64>> {
        match &self.result {
            CallResult::Affected(counts) => Some(counts),
            _ => None,
        }
    }

    /// Raw responses of a `responses`-mode call
    pub fn responses(&self) -> Option<&[DistributedResponse]> {
        match &self.result {
            CallResult::Responses(responses) => Some(responses),
            _ => None,
        }
    }
}

/// Shape a merged result for the caller
pub fn shape(merged: MergedResult, mode: OutputMode) -> ResultEnvelope {
    match merged {
        MergedResult::Responses(responses) => ResultEnvelope {
            result: CallResult::Responses(responses),
            counters: CallCounters::default(),
        },

        MergedResult::Affected(counts) => ResultEnvelope {
            result: CallResult::Affected(counts),
            counters: CallCounters::default(),
        },

        MergedResult::Records { records, counters } => {
            let result = match mode {
                // The node id tag is always present in this design; the
                // embed mode exists for caller clarity and back-compat.
                OutputMode::Array | OutputMode::EmbedNodeId | OutputMode::Responses => {
                    CallResult::Array(records)
                }
                OutputMode::Map => CallResult::Map(group_by_node(records)),
                OutputMode::OnlyValue => {
                    let mut bare = records;
                    for record in &mut bare {
                        tags::strip(record);
                    }
                    CallResult::Values(bare)
                }
            };
            ResultEnvelope { result, counters }
        }
    }
}

fn group_by_node(records: Vec<Value>) -> BTreeMap<NodeId, NodeGroup> {
    let mut groups: BTreeMap<NodeId, NodeGroup> = BTreeMap::new();
    for record in records {
        let Some(node_id) = tags::node_id_of(&record) else {
            warn!("Dropping untagged record from map output");
            continue;
        };
        let group = groups.entry(node_id).or_default();
        group.records.push(record);
        group.count += 1;
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merged() -> MergedResult {
        MergedResult::Records {
            records: vec![
                json!({"id": 1, "__nodeId__": "a", "__class__": "user", "__registry__": "main"}),
                json!({"id": 2, "__nodeId__": "b", "__class__": "user", "__registry__": "main"}),
                json!({"id": 3, "__nodeId__": "a", "__class__": "user", "__registry__": "main"}),
            ],
            counters: CallCounters {
                count: 3,
                ..CallCounters::default()
            },
        }
    }

    #[test]
    fn array_keeps_tags_and_order() {
        let envelope = shape(merged(), OutputMode::Array);
        let records = envelope.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0][tags::NODE_ID], json!("a"));
        assert_eq!(envelope.counters.count, 3);
    }

    #[test]
    fn map_groups_by_node_with_sub_counts() {
        let envelope = shape(merged(), OutputMode::Map);
        let CallResult::Map(groups) = envelope.result else {
            panic!("expected map result");
        };
        assert_eq!(groups[&NodeId::new("a")].count, 2);
        assert_eq!(groups[&NodeId::new("b")].count, 1);
    }

    #[test]
    fn only_value_strips_provenance() {
        let envelope = shape(merged(), OutputMode::OnlyValue);
        let records = envelope.records();
        assert_eq!(records[0], json!({"id": 1}));
    }
}
