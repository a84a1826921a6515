//! Result merger
//!
//! Applies the operation-specific merge rule once a call's responses are
//! collected, and synthesizes a single aggregate error when one or more
//! nodes reported failure. Correct under any interleaving: responses arrive
//! in node-arrival order and that order is preserved for concatenation.

use std::collections::BTreeMap;

use fanout_topology::{NodeId, OperationFamily};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};
use crate::messages::DistributedResponse;
use crate::options::{CallOptions, OutputMode};
use crate::tags;

/// Call-level counters summed across participants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounters {
    /// Total records across nodes
    pub count: u64,
    /// Sum of per-node limits (pass-through for a single-node hint)
    pub limit: Option<u64>,
    /// Sum of per-node offsets
    pub offset: Option<u64>,
    /// Entities saved across nodes
    pub saved: u64,
    /// Entities that failed to save across nodes
    pub errored: u64,
}

/// Merged result before output shaping
#[derive(Debug, Clone)]
pub enum MergedResult {
    /// Concatenated records with call-level counters (find/save/aggregate)
    Records {
        /// Records in node-arrival order, provenance-tagged
        records: Vec<Value>,
        /// Call-level counters
        counters: CallCounters,
    },
    /// Per-node affected-row counts (remove/update); never a flat number
    Affected(BTreeMap<NodeId, i64>),
    /// Raw per-node responses (`responses` output mode only)
    Responses(Vec<DistributedResponse>),
}

/// Merge the collected responses of one call.
///
/// In `responses` output mode the raw responses pass through verbatim and
/// error synthesis is bypassed entirely; the caller inspects per-node errors
/// itself.
pub fn merge(
    operation: OperationFamily,
    responses: Vec<DistributedResponse>,
    options: &CallOptions,
) -> EngineResult<MergedResult> {
    if options.output_mode == OutputMode::Responses {
        return Ok(MergedResult::Responses(responses));
    }

    if responses.is_empty() {
        return Err(EngineError::NoResponses);
    }

    synthesize_errors(&responses)?;

    match operation {
        OperationFamily::Find | OperationFamily::Aggregate => Ok(merge_records(&responses)),
        OperationFamily::Save => Ok(merge_save(&responses)),
        OperationFamily::Remove | OperationFamily::Update => Ok(merge_affected(&responses)),
    }
}

/// Fail with one aggregate error when any node reported failure.
///
/// The message is one `"{nodeId}: {message}"` line per failing node, sorted
/// lexicographically by node id and newline-joined. No partial success data
/// is attached: surfacing is all-or-nothing for the caller even though the
/// underlying effects were not.
fn synthesize_errors(responses: &[DistributedResponse]) -> EngineResult<()> {
    let mut lines: Vec<String> = responses
        .iter()
        .filter_map(|response| {
            response
                .error
                .as_ref()
                .map(|message| format!("{}: {}", response.responder_node_id, message))
        })
        .collect();

    if lines.is_empty() {
        return Ok(());
    }
    lines.sort();
    Err(EngineError::Aggregate {
        message: lines.join("\n"),
    })
}

fn merge_records(responses: &[DistributedResponse]) -> MergedResult {
    let mut records = Vec::new();
    for response in responses {
        records.extend(response.results.iter().cloned());
    }

    MergedResult::Records {
        records,
        counters: sum_counters(responses),
    }
}

/// One output record per input entity, annotated with the union across
/// target nodes of the identifiers each node assigned. Two nodes may
/// legitimately assign the same numeric id independently, so the per-node
/// map is the only faithful report.
fn merge_save(responses: &[DistributedResponse]) -> MergedResult {
    let entity_count = responses
        .iter()
        .map(|response| response.results.len())
        .max()
        .unwrap_or(0);

    let mut records = Vec::with_capacity(entity_count);
    for index in 0..entity_count {
        let mut ids = Map::new();
        for response in responses {
            if let Some(id) = response
                .results
                .get(index)
                .and_then(|record| record.get(tags::ASSIGNED_ID))
            {
                ids.insert(response.responder_node_id.to_string(), id.clone());
            }
        }

        // Base record from the first node that saved this entity.
        let mut record = responses
            .iter()
            .find_map(|response| response.results.get(index).cloned())
            .unwrap_or(Value::Null);
        if let Some(object) = record.as_object_mut() {
            object.remove(tags::ASSIGNED_ID);
            object.insert(tags::IDS.to_string(), Value::Object(ids));
        }
        records.push(record);
    }

    MergedResult::Records {
        records,
        counters: sum_counters(responses),
    }
}

fn merge_affected(responses: &[DistributedResponse]) -> MergedResult {
    let counts = responses
        .iter()
        .map(|response| {
            // A missing counter means the driver could not report one.
            let affected = response.counters.affected.unwrap_or(-2);
            (response.responder_node_id.clone(), affected)
        })
        .collect();
    MergedResult::Affected(counts)
}

fn sum_counters(responses: &[DistributedResponse]) -> CallCounters {
    let mut counters = CallCounters::default();
    for response in responses {
        counters.count += response.counters.count;
        counters.saved += response.counters.saved;
        counters.errored += response.counters.errored;
        if let Some(limit) = response.counters.limit {
            counters.limit = Some(counters.limit.unwrap_or(0) + limit);
        }
        if let Some(offset) = response.counters.offset {
            counters.offset = Some(counters.offset.unwrap_or(0) + offset);
        }
    }
    counters
}
