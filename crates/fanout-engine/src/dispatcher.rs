//! Request dispatcher
//!
//! One dispatch call resolves the participant set, assigns a correlation id,
//! publishes a single request broadcast, and collects responses keyed by
//! (correlation id, responder node id) until every expected node answered or
//! the per-call timeout elapsed. Isolation between concurrent calls comes
//! purely from keying the pending table on the correlation id; no global
//! lock is held while calls are in flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fanout_topology::{MembershipView, NodeId, OperationFamily};
use fanout_transport::{DISTRIBUTED_REQUEST, PubSubTransport, TransportEnvelope};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::messages::{self, DistributedRequest, DistributedResponse, RequestPayload};
use crate::options::CallOptions;

/// Response accumulator of one in-flight call
struct PendingCall {
    expected: HashSet<NodeId>,
    state: Mutex<CallState>,
}

struct CallState {
    /// Responses in node-arrival order
    responses: Vec<DistributedResponse>,
    /// Nodes already counted; duplicates from at-least-once delivery are dropped
    seen: HashSet<NodeId>,
    /// Fired once every expected node has answered
    complete: Option<oneshot::Sender<()>>,
}

/// Per-node request dispatcher
pub struct RequestDispatcher<T: PubSubTransport> {
    node_id: NodeId,
    transport: Arc<T>,
    membership: MembershipView,
    default_timeout: Duration,
    pending: DashMap<Uuid, Arc<PendingCall>>,
}

impl<T: PubSubTransport> RequestDispatcher<T> {
    /// Create a dispatcher for the given node
    pub fn new(
        node_id: NodeId,
        transport: Arc<T>,
        membership: MembershipView,
        default_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            transport,
            membership,
            default_timeout,
            pending: DashMap::new(),
        }
    }

    /// The membership view this dispatcher consults
    pub fn membership(&self) -> &MembershipView {
        &self.membership
    }

    /// This node's id
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Dispatch one distributed call and collect the per-node responses.
    ///
    /// Responses are returned in node-arrival order. Fails with
    /// [`EngineError::NoResponses`] when zero expected nodes answered; a
    /// partial set after timeout is returned as-is.
    pub async fn dispatch(
        &self,
        entity: &str,
        payload: RequestPayload,
        options: CallOptions,
    ) -> EngineResult<Vec<DistributedResponse>> {
        let operation = payload.operation();
        let (expected, explicit_targets) = self.resolve_participants(operation, &options);

        if expected.is_empty() {
            debug!("No participants for '{}' on entity '{}'", operation, entity);
            return Err(EngineError::NoResponses);
        }

        let correlation_id = Uuid::new_v4();
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        let (complete_tx, complete_rx) = oneshot::channel();
        let call = Arc::new(PendingCall {
            expected: expected.iter().cloned().collect(),
            state: Mutex::new(CallState {
                responses: Vec::new(),
                seen: HashSet::new(),
                complete: Some(complete_tx),
            }),
        });
        self.pending.insert(correlation_id, call.clone());

        let request = DistributedRequest {
            correlation_id,
            origin_node_id: self.node_id.clone(),
            operation,
            entity: entity.to_string(),
            payload,
            target_ids: explicit_targets,
            options,
        };

        debug!(
            "Dispatching '{}' on '{}' to {} nodes, correlation {}",
            operation,
            entity,
            expected.len(),
            correlation_id
        );

        let encoded = match messages::encode(&request) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pending.remove(&correlation_id);
                return Err(e);
            }
        };
        if let Err(e) = self
            .transport
            .publish(TransportEnvelope::new(
                self.node_id.clone(),
                DISTRIBUTED_REQUEST,
                encoded,
            ))
            .await
        {
            self.pending.remove(&correlation_id);
            return Err(e.into());
        }

        // Wait for all expected responses or the per-call timeout; either way
        // the collector is torn down and late responses are discarded.
        let _ = tokio::time::timeout(timeout, complete_rx).await;
        self.pending.remove(&correlation_id);

        let responses = {
            let mut state = call.state.lock();
            std::mem::take(&mut state.responses)
        };

        if responses.is_empty() {
            return Err(EngineError::NoResponses);
        }
        if responses.len() < call.expected.len() {
            warn!(
                "Call {} completed with {}/{} responses after {:?}",
                correlation_id,
                responses.len(),
                call.expected.len(),
                timeout
            );
        }
        Ok(responses)
    }

    /// Record a response routed from the transport.
    ///
    /// Responses for unknown correlation ids (late after timeout, or duplicates
    /// of an already-resolved call) are dropped.
    pub fn accept_response(&self, response: DistributedResponse) {
        if response.resp_id != self.node_id {
            // Addressed to another origin node sharing the bus.
            return;
        }

        let Some(call) = self
            .pending
            .get(&response.correlation_id)
            .map(|entry| entry.value().clone())
        else {
            debug!(
                "Discarding late or unknown response {} from {}",
                response.correlation_id, response.responder_node_id
            );
            return;
        };

        if !call.expected.contains(&response.responder_node_id) {
            warn!(
                "Response from unexpected node {} for call {}",
                response.responder_node_id, response.correlation_id
            );
            return;
        }

        let mut state = call.state.lock();
        if !state.seen.insert(response.responder_node_id.clone()) {
            debug!(
                "Duplicate response from {} for call {}",
                response.responder_node_id, response.correlation_id
            );
            return;
        }
        state.responses.push(response);

        if state.seen.len() == call.expected.len() {
            if let Some(complete) = state.complete.take() {
                let _ = complete.send(());
            }
        }
    }

    /// Compute the participant set for one call.
    ///
    /// Returns the expected responders plus the explicit target list to put
    /// on the wire (`None` for an unaddressed broadcast).
    fn resolve_participants(
        &self,
        operation: OperationFamily,
        options: &CallOptions,
    ) -> (Vec<NodeId>, Option<Vec<NodeId>>) {
        // A find hint short-circuits to that single node.
        if let Some(hint) = &options.hint {
            if self.membership.is_active(hint) {
                return (vec![hint.clone()], Some(vec![hint.clone()]));
            }
            warn!("Hint node {} is not an active participant", hint);
            return (Vec::new(), None);
        }

        if !options.target_ids.is_empty() {
            let mut participants = Vec::new();
            for target in &options.target_ids {
                if self.membership.is_active(target) {
                    participants.push(target.clone());
                } else {
                    // Unknown target is a soft warning, not an error.
                    warn!("Target node {} is not an active participant", target);
                }
            }
            return (participants.clone(), Some(participants));
        }

        let mut participants: Vec<NodeId> = self
            .membership
            .list_active()
            .into_iter()
            .filter(|node| self.membership.is_participant(node, operation))
            .collect();
        if options.skip_local {
            participants.retain(|node| *node != self.node_id);
        }
        (participants, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ResponseCounters;
    use async_trait::async_trait;
    use fanout_topology::{NodeRecord, ResponderPolicy};
    use fanout_transport::TransportError;
    use futures::Stream;
    use std::pin::Pin;

    /// Transport that swallows every publish
    struct NullTransport;

    #[async_trait]
    impl PubSubTransport for NullTransport {
        async fn publish(&self, _envelope: TransportEnvelope) -> Result<(), TransportError> {
            Ok(())
        }

        fn incoming(&self) -> Pin<Box<dyn Stream<Item = TransportEnvelope> + Send>> {
            Box::pin(futures::stream::pending())
        }

        async fn shutdown(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn membership_of(seeds: &[u8]) -> MembershipView {
        let view = MembershipView::new();
        for seed in seeds {
            view.apply_register(NodeRecord::new(NodeId::from_seed(*seed), "host", "machine"));
        }
        view
    }

    fn dispatcher(view: MembershipView) -> RequestDispatcher<NullTransport> {
        RequestDispatcher::new(
            NodeId::from_seed(1),
            Arc::new(NullTransport),
            view,
            Duration::from_millis(50),
        )
    }

    fn response(correlation_id: Uuid, seed: u8) -> DistributedResponse {
        DistributedResponse {
            correlation_id,
            responder_node_id: NodeId::from_seed(seed),
            resp_id: NodeId::from_seed(1),
            results: Vec::new(),
            error: None,
            counters: ResponseCounters::default(),
        }
    }

    #[test]
    fn broadcast_participants_exclude_disabled_families() {
        let view = membership_of(&[1, 2]);
        view.apply_register(
            NodeRecord::new(NodeId::from_seed(3), "host", "machine")
                .with_policy(ResponderPolicy::allow([OperationFamily::Save])),
        );
        let dispatcher = dispatcher(view);

        let (participants, wire) =
            dispatcher.resolve_participants(OperationFamily::Find, &CallOptions::default());
        assert_eq!(
            participants,
            vec![NodeId::from_seed(1), NodeId::from_seed(2)]
        );
        assert!(wire.is_none());

        // Explicitly targeting the disabled node still includes it.
        let (targeted, wire) = dispatcher.resolve_participants(
            OperationFamily::Find,
            &CallOptions::targets([NodeId::from_seed(3)]),
        );
        assert_eq!(targeted, vec![NodeId::from_seed(3)]);
        assert_eq!(wire, Some(vec![NodeId::from_seed(3)]));
    }

    #[test]
    fn skip_local_removes_this_node() {
        let dispatcher = dispatcher(membership_of(&[1, 2, 3]));
        let (participants, _) = dispatcher
            .resolve_participants(OperationFamily::Find, &CallOptions::default().without_local());
        assert_eq!(
            participants,
            vec![NodeId::from_seed(2), NodeId::from_seed(3)]
        );
    }

    #[test]
    fn unknown_targets_are_soft_warnings() {
        let dispatcher = dispatcher(membership_of(&[1, 2]));
        let (participants, _) = dispatcher.resolve_participants(
            OperationFamily::Find,
            &CallOptions::targets([NodeId::from_seed(2), NodeId::from_seed(9)]),
        );
        assert_eq!(participants, vec![NodeId::from_seed(2)]);
    }

    #[test]
    fn hint_short_circuits_to_one_node() {
        let dispatcher = dispatcher(membership_of(&[1, 2, 3]));
        let (participants, wire) = dispatcher.resolve_participants(
            OperationFamily::Find,
            &CallOptions::default().with_hint(NodeId::from_seed(2)),
        );
        assert_eq!(participants, vec![NodeId::from_seed(2)]);
        assert_eq!(wire, Some(vec![NodeId::from_seed(2)]));
    }

    #[tokio::test]
    async fn no_participants_fails_fast() {
        let dispatcher = dispatcher(MembershipView::new());
        let result = dispatcher
            .dispatch(
                "user",
                RequestPayload::Find {
                    condition: serde_json::json!({}),
                },
                CallOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(EngineError::NoResponses)));
    }

    #[tokio::test]
    async fn timeout_returns_partial_responses() {
        let dispatcher = Arc::new(dispatcher(membership_of(&[1, 2, 3])));

        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(
                        "user",
                        RequestPayload::Find {
                            condition: serde_json::json!({}),
                        },
                        CallOptions::default(),
                    )
                    .await
            })
        };

        // Answer from two of the three expected nodes, then let the call time out.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let correlation_id = *dispatcher
            .pending
            .iter()
            .next()
            .expect("call should be pending")
            .key();
        dispatcher.accept_response(response(correlation_id, 1));
        dispatcher.accept_response(response(correlation_id, 2));

        let responses = call.await.unwrap().unwrap();
        assert_eq!(responses.len(), 2);
        assert!(dispatcher.pending.is_empty());
    }

    #[tokio::test]
    async fn duplicate_and_late_responses_are_discarded() {
        let dispatcher = Arc::new(dispatcher(membership_of(&[1, 2])));

        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(
                        "user",
                        RequestPayload::Find {
                            condition: serde_json::json!({}),
                        },
                        CallOptions::default(),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let correlation_id = *dispatcher.pending.iter().next().unwrap().key();

        // At-least-once delivery: the same node answers twice.
        dispatcher.accept_response(response(correlation_id, 1));
        dispatcher.accept_response(response(correlation_id, 1));
        dispatcher.accept_response(response(correlation_id, 2));

        let responses = call.await.unwrap().unwrap();
        assert_eq!(responses.len(), 2);

        // The collector is gone; a late response is a no-op.
        dispatcher.accept_response(response(correlation_id, 2));
        assert!(dispatcher.pending.is_empty());
    }

    #[tokio::test]
    async fn zero_answers_is_no_responses() {
        let dispatcher = dispatcher(membership_of(&[2, 3]));
        let result = dispatcher
            .dispatch(
                "user",
                RequestPayload::Find {
                    condition: serde_json::json!({}),
                },
                CallOptions::default().with_timeout(Duration::from_millis(20)),
            )
            .await;
        assert!(matches!(result, Err(EngineError::NoResponses)));
    }
}
