//! Per-node local responder
//!
//! Turns an inbound distributed request into a local store operation and a
//! reply. Execution runs behind a bounded-concurrency queue (default 1) so a
//! burst of inbound requests cannot overwhelm the local store. Responses are
//! posted and forgotten; the responder neither awaits acknowledgement nor
//! retries.

use std::sync::Arc;

use fanout_store::{FindOptions, LocalStore};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::ResponderConfig;
use crate::messages::{DistributedRequest, DistributedResponse, RequestPayload, ResponseCounters};
use crate::tags;
use fanout_topology::{NodeId, ResponderPolicy};

/// The per-node responder for distributed requests
pub struct LocalResponder<S: LocalStore> {
    node_id: NodeId,
    policy: ResponderPolicy,
    store: Arc<S>,
    /// Bounded work queue in front of the local store
    semaphore: Arc<Semaphore>,
}

impl<S: LocalStore> LocalResponder<S> {
    /// Create a responder for the given node
    pub fn new(node_id: NodeId, config: &ResponderConfig, store: Arc<S>) -> Self {
        Self {
            node_id,
            policy: config.policy.clone(),
            store,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
        }
    }

    /// The responder policy this node advertises on register
    pub fn policy(&self) -> &ResponderPolicy {
        &self.policy
    }

    /// Handle one inbound request.
    ///
    /// Returns the response to publish, or `None` when the request is not
    /// addressed to this node. Denial of an explicitly-targeted request
    /// produces an error response rather than silence, since the caller
    /// expects an answer from a node it named.
    pub async fn handle(&self, request: &DistributedRequest) -> Option<DistributedResponse> {
        // The origin excluded itself from its own broadcast.
        if request.options.skip_local && request.origin_node_id == self.node_id {
            return None;
        }

        let explicitly_targeted = request.targets(&self.node_id);
        if !request.is_broadcast() && !explicitly_targeted {
            return None;
        }

        let family = request.operation;
        if !self.policy.serves(family) {
            if explicitly_targeted {
                return Some(self.error_response(
                    request,
                    format!(
                        "Node {} does not serve '{}' operations",
                        self.node_id, family
                    ),
                ));
            }
            debug!(
                "Ignoring '{}' broadcast, family disabled on node {}",
                family, self.node_id
            );
            return None;
        }
        if self.policy.is_remote_only(family) && !explicitly_targeted {
            debug!(
                "Ignoring '{}' broadcast, family is remote-only on node {}",
                family, self.node_id
            );
            return None;
        }

        // Bounded-concurrency gate; never closed, so acquisition cannot fail.
        let _permit = self.semaphore.acquire().await.ok()?;

        let response = match self.execute(request).await {
            Ok((results, counters)) => DistributedResponse {
                correlation_id: request.correlation_id,
                responder_node_id: self.node_id.clone(),
                resp_id: request.origin_node_id.clone(),
                results,
                error: None,
                counters,
            },
            Err(message) => {
                warn!(
                    "Local execution of '{}' on node {} failed: {}",
                    family, self.node_id, message
                );
                self.error_response(request, message)
            }
        };

        Some(response)
    }

    fn error_response(&self, request: &DistributedRequest, message: String) -> DistributedResponse {
        let errored = match &request.payload {
            RequestPayload::Save { entities } => entities.len() as u64,
            _ => 0,
        };
        DistributedResponse {
            correlation_id: request.correlation_id,
            responder_node_id: self.node_id.clone(),
            resp_id: request.origin_node_id.clone(),
            results: Vec::new(),
            error: Some(message),
            counters: ResponseCounters {
                errored,
                ..ResponseCounters::default()
            },
        }
    }

    /// Execute the request against the local store with its native semantics.
    ///
    /// Conditions, limit and offset apply to this node's local subset only.
    async fn execute(
        &self,
        request: &DistributedRequest,
    ) -> Result<(Vec<serde_json::Value>, ResponseCounters), String> {
        let entity = request.entity.as_str();
        let schema = self
            .store
            .schema(entity)
            .ok_or_else(|| format!("Unknown entity type '{entity}'"))?;

        match &request.payload {
            RequestPayload::Find { condition } => {
                let mut results = if request.options.hint.is_some() {
                    // A hinted find asks for the single best local match.
                    self.store
                        .find_one(entity, condition)
                        .await
                        .map_err(|e| e.to_string())?
                        .into_iter()
                        .collect()
                } else {
                    let options = FindOptions {
                        limit: request.options.limit,
                        offset: request.options.offset,
                    };
                    self.store
                        .find(entity, condition, &options)
                        .await
                        .map_err(|e| e.to_string())?
                };

                for record in &mut results {
                    tags::annotate(record, &self.node_id, &schema);
                }
                let counters = ResponseCounters {
                    count: results.len() as u64,
                    limit: request.options.limit,
                    offset: request.options.offset,
                    ..ResponseCounters::default()
                };
                Ok((results, counters))
            }

            RequestPayload::Save { entities } => {
                let saved = self
                    .store
                    .save(entity, entities.clone())
                    .await
                    .map_err(|e| e.to_string())?;

                let mut results = Vec::with_capacity(saved.len());
                for row in saved {
                    let mut record = row.entity;
                    tags::annotate(&mut record, &self.node_id, &schema);
                    if let Some(object) = record.as_object_mut() {
                        object.insert(tags::ASSIGNED_ID.to_string(), row.id);
                    }
                    results.push(record);
                }

                let counters = ResponseCounters {
                    saved: results.len() as u64,
                    ..ResponseCounters::default()
                };
                Ok((results, counters))
            }

            RequestPayload::Remove { target } => {
                let affected = self
                    .store
                    .remove(entity, target.clone())
                    .await
                    .map_err(|e| e.to_string())?;
                let counters = ResponseCounters {
                    affected: Some(affected.as_sentinel()),
                    ..ResponseCounters::default()
                };
                Ok((Vec::new(), counters))
            }

            RequestPayload::Update { condition, update } => {
                let affected = self
                    .store
                    .update(entity, condition, update)
                    .await
                    .map_err(|e| e.to_string())?;
                let counters = ResponseCounters {
                    affected: Some(affected.as_sentinel()),
                    ..ResponseCounters::default()
                };
                Ok((Vec::new(), counters))
            }

            RequestPayload::Aggregate { pipeline } => {
                let mut results = self
                    .store
                    .aggregate(entity, pipeline)
                    .await
                    .map_err(|e| e.to_string())?;
                for record in &mut results {
                    tags::annotate(record, &self.node_id, &schema);
                }
                let counters = ResponseCounters {
                    count: results.len() as u64,
                    ..ResponseCounters::default()
                };
                Ok((results, counters))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CallOptions;
    use fanout_store::{
        AffectedRows, EntitySchema, RemoveTarget, SavedRow, SchemaRegistry, StoreError,
    };
    use fanout_topology::OperationFamily;
    use serde_json::{Value, json};
    use uuid::Uuid;

    /// Store stub that records nothing and returns canned answers
    struct StubStore {
        schemas: SchemaRegistry,
        rows: Vec<Value>,
    }

    impl StubStore {
        fn new(rows: Vec<Value>) -> Self {
            let mut schemas = SchemaRegistry::new();
            schemas.register(EntitySchema::new("user", "main", "id").with_fields(["name"]));
            Self { schemas, rows }
        }
    }

    #[async_trait::async_trait]
    impl LocalStore for StubStore {
        async fn find(
            &self,
            _entity: &str,
            _condition: &Value,
            options: &FindOptions,
        ) -> Result<Vec<Value>, StoreError> {
            let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
            Ok(self.rows.iter().take(limit).cloned().collect())
        }

        async fn find_one(
            &self,
            _entity: &str,
            _condition: &Value,
        ) -> Result<Option<Value>, StoreError> {
            Ok(self.rows.first().cloned())
        }

        async fn save(
            &self,
            _entity: &str,
            entities: Vec<Value>,
        ) -> Result<Vec<SavedRow>, StoreError> {
            Ok(entities
                .into_iter()
                .enumerate()
                .map(|(index, entity)| SavedRow {
                    entity,
                    id: json!(index + 1),
                })
                .collect())
        }

        async fn remove(
            &self,
            _entity: &str,
            target: RemoveTarget,
        ) -> Result<AffectedRows, StoreError> {
            Ok(match target {
                RemoveTarget::Ids(ids) => AffectedRows::Count(ids.len() as u64),
                RemoveTarget::Condition(_) => AffectedRows::Unsupported,
            })
        }

        async fn update(
            &self,
            _entity: &str,
            _condition: &Value,
            _update: &Value,
        ) -> Result<AffectedRows, StoreError> {
            Ok(AffectedRows::Unsupported)
        }

        async fn aggregate(
            &self,
            _entity: &str,
            _pipeline: &[Value],
        ) -> Result<Vec<Value>, StoreError> {
            Ok(self.rows.clone())
        }

        fn schema(&self, entity: &str) -> Option<std::sync::Arc<EntitySchema>> {
            self.schemas.get(entity)
        }
    }

    fn responder(policy: ResponderPolicy) -> LocalResponder<StubStore> {
        let config = ResponderConfig {
            concurrency: 1,
            policy,
        };
        LocalResponder::new(
            NodeId::from_seed(1),
            &config,
            Arc::new(StubStore::new(vec![json!({"id": 7, "name": "ada"})])),
        )
    }

    fn find_request(target_ids: Option<Vec<NodeId>>) -> DistributedRequest {
        DistributedRequest {
            correlation_id: Uuid::new_v4(),
            origin_node_id: NodeId::from_seed(9),
            operation: OperationFamily::Find,
            entity: "user".to_string(),
            payload: RequestPayload::Find {
                condition: json!({}),
            },
            target_ids,
            options: CallOptions::default(),
        }
    }

    #[tokio::test]
    async fn broadcast_find_is_answered_with_tags() {
        let responder = responder(ResponderPolicy::allow_all());
        let response = responder.handle(&find_request(None)).await.unwrap();

        assert!(response.error.is_none());
        assert_eq!(response.counters.count, 1);
        assert_eq!(response.results[0][tags::NODE_ID], json!("node-1"));
        assert_eq!(response.results[0][tags::CLASS], json!("user"));
        assert_eq!(response.resp_id, NodeId::from_seed(9));
    }

    #[tokio::test]
    async fn request_for_other_node_is_ignored() {
        let responder = responder(ResponderPolicy::allow_all());
        let request = find_request(Some(vec![NodeId::from_seed(2)]));
        assert!(responder.handle(&request).await.is_none());
    }

    #[tokio::test]
    async fn disabled_family_is_silent_unless_targeted() {
        let responder = responder(ResponderPolicy::allow([OperationFamily::Save]));

        // Unaddressed broadcast: silence.
        assert!(responder.handle(&find_request(None)).await.is_none());

        // Explicit target: denial must answer.
        let request = find_request(Some(vec![NodeId::from_seed(1)]));
        let response = responder.handle(&request).await.unwrap();
        assert!(response.error.unwrap().contains("does not serve 'find'"));
    }

    #[tokio::test]
    async fn remote_only_family_serves_only_explicit_targets() {
        let responder = responder(
            ResponderPolicy::allow_all().with_remote_only([OperationFamily::Find]),
        );

        assert!(responder.handle(&find_request(None)).await.is_none());

        let request = find_request(Some(vec![NodeId::from_seed(1)]));
        assert!(responder.handle(&request).await.is_some());
    }

    #[tokio::test]
    async fn skip_local_suppresses_origin_node() {
        let responder = responder(ResponderPolicy::allow_all());
        let mut request = find_request(None);
        request.origin_node_id = NodeId::from_seed(1);
        request.options.skip_local = true;
        assert!(responder.handle(&request).await.is_none());
    }

    #[tokio::test]
    async fn save_reports_assigned_ids() {
        let responder = responder(ResponderPolicy::allow_all());
        let request = DistributedRequest {
            correlation_id: Uuid::new_v4(),
            origin_node_id: NodeId::from_seed(9),
            operation: OperationFamily::Save,
            entity: "user".to_string(),
            payload: RequestPayload::Save {
                entities: vec![json!({"name": "bob"})],
            },
            target_ids: None,
            options: CallOptions::default(),
        };

        let response = responder.handle(&request).await.unwrap();
        assert_eq!(response.counters.saved, 1);
        assert_eq!(response.results[0][tags::ASSIGNED_ID], json!(1));
    }

    #[tokio::test]
    async fn condition_remove_reports_sentinel() {
        let responder = responder(ResponderPolicy::allow_all());
        let request = DistributedRequest {
            correlation_id: Uuid::new_v4(),
            origin_node_id: NodeId::from_seed(9),
            operation: OperationFamily::Remove,
            entity: "user".to_string(),
            payload: RequestPayload::Remove {
                target: RemoveTarget::Condition(json!({"name": "ada"})),
            },
            target_ids: None,
            options: CallOptions::default(),
        };

        let response = responder.handle(&request).await.unwrap();
        assert_eq!(response.counters.affected, Some(-2));
    }
}
