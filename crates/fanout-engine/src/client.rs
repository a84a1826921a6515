//! Caller-facing facade over the dispatcher
//!
//! One method per distributed operation; every call fans out to the resolved
//! participant set, waits for the per-node answers, and returns the merged,
//! shaped envelope.

use std::collections::BTreeMap;
use std::sync::Arc;

use fanout_store::{LocalStore, RemoveTarget};
use fanout_topology::{NodeId, OperationFamily};
use fanout_transport::PubSubTransport;
use serde_json::Value;

use crate::dispatcher::RequestDispatcher;
use crate::error::{EngineError, EngineResult};
use crate::merger::{self, MergedResult};
use crate::messages::{DistributedResponse, RequestPayload};
use crate::options::CallOptions;
use crate::shaper::{self, ResultEnvelope};
use crate::tags;

/// Handle for issuing distributed calls from one node
pub struct DistributedClient<T: PubSubTransport, S: LocalStore> {
    dispatcher: Arc<RequestDispatcher<T>>,
    store: Arc<S>,
}

impl<T: PubSubTransport, S: LocalStore> Clone for DistributedClient<T, S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            store: Arc::clone(&self.store),
        }
    }
}

impl<T: PubSubTransport, S: LocalStore> DistributedClient<T, S> {
    pub(crate) fn new(dispatcher: Arc<RequestDispatcher<T>>, store: Arc<S>) -> Self {
        Self { dispatcher, store }
    }

    async fn call(
        &self,
        entity: &str,
        payload: RequestPayload,
        options: CallOptions,
    ) -> EngineResult<ResultEnvelope> {
        let operation = payload.operation();
        let responses = self
            .dispatcher
            .dispatch(entity, payload, options.clone())
            .await?;
        let merged = merger::merge(operation, responses, &options)?;
        Ok(shaper::shape(merged, options.output_mode))
    }

    /// Find records matching the condition across the participant set.
    ///
    /// Limit and offset apply per node: `limit = L` over `N` participants
    /// yields up to `L * N` records, at most `L` from each node.
    pub async fn find(
        &self,
        entity: &str,
        condition: Value,
        options: CallOptions,
    ) -> EngineResult<ResultEnvelope> {
        self.call(entity, RequestPayload::Find { condition }, options)
            .await
    }

    /// Find the single best match on one preferred node
    pub async fn find_one(
        &self,
        entity: &str,
        condition: Value,
        hint: NodeId,
    ) -> EngineResult<Option<Value>> {
        let envelope = self
            .find(entity, condition, CallOptions::default().with_hint(hint))
            .await?;
        Ok(envelope.records().first().cloned())
    }

    /// Persist entities on every participant.
    ///
    /// Each node assigns identity independently; every merged record carries
    /// the per-node id map under `__ids__`.
    pub async fn save(
        &self,
        entity: &str,
        entities: Vec<Value>,
        options: CallOptions,
    ) -> EngineResult<ResultEnvelope> {
        self.call(entity, RequestPayload::Save { entities }, options)
            .await
    }

    /// Remove every record matching the condition on every participant
    pub async fn remove(
        &self,
        entity: &str,
        condition: Value,
        options: CallOptions,
    ) -> EngineResult<ResultEnvelope> {
        self.call(
            entity,
            RequestPayload::Remove {
                target: RemoveTarget::Condition(condition),
            },
            options,
        )
        .await
    }

    /// Remove previously fetched records on the nodes that produced them.
    ///
    /// Records are grouped by their `__nodeId__` provenance tag and deleted
    /// on that node only.
    pub async fn remove_entities(
        &self,
        entity: &str,
        records: Vec<Value>,
        options: CallOptions,
    ) -> EngineResult<ResultEnvelope> {
        let schema = self
            .store
            .schema(entity)
            .ok_or_else(|| EngineError::UnknownEntity(entity.to_string()))?;

        let mut by_node: BTreeMap<NodeId, Vec<Value>> = BTreeMap::new();
        for record in &records {
            let node_id = tags::node_id_of(record).ok_or_else(|| {
                EngineError::Serialization(format!(
                    "Record is missing the {} provenance tag",
                    tags::NODE_ID
                ))
            })?;
            let id = record.get(&schema.id_field).cloned().ok_or_else(|| {
                EngineError::Serialization(format!(
                    "Record is missing its '{}' identifier",
                    schema.id_field
                ))
            })?;
            by_node.entry(node_id).or_default().push(id);
        }

        // Nothing to remove is an empty affected map, not a failed call.
        if by_node.is_empty() {
            return Ok(shaper::shape(
                MergedResult::Affected(BTreeMap::new()),
                options.output_mode,
            ));
        }

        let mut responses: Vec<DistributedResponse> = Vec::new();
        for (node_id, ids) in by_node {
            let mut node_options = options.clone();
            node_options.target_ids = vec![node_id];
            node_options.hint = None;
            let node_responses = self
                .dispatcher
                .dispatch(
                    entity,
                    RequestPayload::Remove {
                        target: RemoveTarget::Ids(ids),
                    },
                    node_options,
                )
                .await?;
            responses.extend(node_responses);
        }

        let merged = merger::merge(OperationFamily::Remove, responses, &options)?;
        Ok(shaper::shape(merged, options.output_mode))
    }

    /// Apply an update document to matching records on every participant
    pub async fn update(
        &self,
        entity: &str,
        condition: Value,
        update: Value,
        options: CallOptions,
    ) -> EngineResult<ResultEnvelope> {
        self.call(
            entity,
            RequestPayload::Update { condition, update },
            options,
        )
        .await
    }

    /// Run an aggregation pipeline on every participant.
    ///
    /// Each node executes the full pipeline against its own local subset;
    /// `$skip`/`$limit` are not globally coordinated.
    pub async fn aggregate(
        &self,
        entity: &str,
        pipeline: Vec<Value>,
        options: CallOptions,
    ) -> EngineResult<ResultEnvelope> {
        self.call(entity, RequestPayload::Aggregate { pipeline }, options)
            .await
    }
}
