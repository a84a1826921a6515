//! Cluster node composition root
//!
//! Wires a transport, a local store, the membership view, the dispatcher and
//! the responder into one running node. The router task owns the inbound
//! envelope stream and fans each message out to the right component; request
//! execution is spawned per message so a slow local store never blocks
//! membership updates.

use std::sync::Arc;

use fanout_store::{EntitySchema, LocalStore};
use fanout_topology::{MembershipView, NodeId, NodeRecord};
use fanout_transport::{
    DISTRIBUTED_REQUEST, DISTRIBUTED_RESPONSE, NODE_REGISTER, NODE_UNREGISTER, PubSubTransport,
    TransportEnvelope,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::client::DistributedClient;
use crate::config::EngineConfig;
use crate::dispatcher::RequestDispatcher;
use crate::error::EngineResult;
use crate::messages::{
    self, DistributedRequest, DistributedResponse, NodeRegister, NodeUnregister,
};
use crate::responder::LocalResponder;

/// Entity type name under which a node persists its own membership record
pub const NODE_RECORD_ENTITY: &str = "cluster-node";

/// Schema for the membership record entity, for stores that persist it
pub fn node_record_schema() -> EntitySchema {
    EntitySchema::new(NODE_RECORD_ENTITY, "system", "node_id").with_fields([
        "hostname",
        "machine_id",
        "state",
        "started_at",
        "finished_at",
        "policy",
        "contexts",
    ])
}

/// One running cluster node
pub struct ClusterNode<T: PubSubTransport, S: LocalStore> {
    config: EngineConfig,
    transport: Arc<T>,
    store: Arc<S>,
    membership: MembershipView,
    dispatcher: Arc<RequestDispatcher<T>>,
    responder: Arc<LocalResponder<S>>,
    tracker: TaskTracker,
    shutdown_token: CancellationToken,
}

impl<T: PubSubTransport, S: LocalStore> ClusterNode<T, S> {
    /// Assemble a node from its configuration, transport and local store
    pub fn new(config: EngineConfig, transport: T, store: S) -> Self {
        let transport = Arc::new(transport);
        let store = Arc::new(store);
        let membership = MembershipView::new();

        let dispatcher = Arc::new(RequestDispatcher::new(
            config.node_id.clone(),
            transport.clone(),
            membership.clone(),
            config.default_timeout,
        ));
        let responder = Arc::new(LocalResponder::new(
            config.node_id.clone(),
            &config.responder,
            store.clone(),
        ));

        Self {
            config,
            transport,
            store,
            membership,
            dispatcher,
            responder,
            tracker: TaskTracker::new(),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// This node's id
    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    /// The membership view this node maintains
    pub fn membership(&self) -> &MembershipView {
        &self.membership
    }

    /// The local store this node executes against
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// A client handle for issuing distributed calls from this node
    pub fn client(&self) -> DistributedClient<T, S> {
        DistributedClient::new(self.dispatcher.clone(), self.store.clone())
    }

    /// Start the router task and announce this node to the cluster.
    ///
    /// The register broadcast is also applied to the local view directly, so
    /// the node sees itself as a participant even on a transport that does
    /// not loop a sender's own messages back.
    pub async fn start(&self) -> EngineResult<()> {
        self.spawn_router();

        let record = self.own_record();
        let encoded = messages::encode(&NodeRegister {
            record: record.clone(),
        })?;
        self.transport
            .publish(TransportEnvelope::new(
                self.config.node_id.clone(),
                NODE_REGISTER,
                encoded,
            ))
            .await?;
        self.membership.apply_register(record.clone());
        self.persist_own_record(&record).await;

        info!(
            "Node {} started on {} ({})",
            self.config.node_id, self.config.hostname, self.config.machine_id
        );
        Ok(())
    }

    /// Announce departure and stop the router.
    ///
    /// The unregister broadcast goes out before the router stops, so peers
    /// drop this node from their participant sets instead of timing out
    /// against it.
    pub async fn shutdown(&self) -> EngineResult<()> {
        let encoded = messages::encode(&NodeUnregister {
            record: self.own_record(),
        })?;
        if let Err(e) = self
            .transport
            .publish(TransportEnvelope::new(
                self.config.node_id.clone(),
                NODE_UNREGISTER,
                encoded,
            ))
            .await
        {
            warn!("Failed to publish unregister broadcast: {e}");
        }
        self.membership.apply_unregister(&self.config.node_id);

        self.shutdown_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.transport.shutdown().await?;

        info!("Node {} stopped", self.config.node_id);
        Ok(())
    }

    fn own_record(&self) -> NodeRecord {
        NodeRecord::new(
            self.config.node_id.clone(),
            self.config.hostname.clone(),
            self.config.machine_id.clone(),
        )
        .with_policy(self.config.responder.policy.clone())
    }

    /// Persist this node's record locally when the store knows the entity
    async fn persist_own_record(&self, record: &NodeRecord) {
        if self.store.schema(NODE_RECORD_ENTITY).is_none() {
            debug!("Local store does not persist membership records");
            return;
        }
        let row = match serde_json::to_value(record) {
            Ok(row) => row,
            Err(e) => {
                warn!("Failed to serialize own membership record: {e}");
                return;
            }
        };
        if let Err(e) = self.store.save(NODE_RECORD_ENTITY, vec![row]).await {
            warn!("Failed to persist own membership record: {e}");
        }
    }

    fn spawn_router(&self) {
        let mut stream = self.transport.incoming();
        let token = self.shutdown_token.clone();
        let tracker = self.tracker.clone();
        let node_id = self.config.node_id.clone();
        let transport = self.transport.clone();
        let membership = self.membership.clone();
        let dispatcher = self.dispatcher.clone();
        let responder = self.responder.clone();

        self.tracker.spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => match next {
                        Some(envelope) => envelope,
                        None => {
                            debug!("Inbound stream of node {} ended", node_id);
                            break;
                        }
                    },
                };

                match envelope.message_type.as_str() {
                    DISTRIBUTED_REQUEST => {
                        let request: DistributedRequest = match messages::decode(&envelope.payload)
                        {
                            Ok(request) => request,
                            Err(e) => {
                                warn!("Dropping undecodable request from {}: {e}", envelope.sender);
                                continue;
                            }
                        };
                        let responder = responder.clone();
                        let transport = transport.clone();
                        let node_id = node_id.clone();
                        tracker.spawn(async move {
                            let Some(response) = responder.handle(&request).await else {
                                return;
                            };
                            // Post and forget; the origin's timeout covers loss.
                            match messages::encode(&response) {
                                Ok(encoded) => {
                                    if let Err(e) = transport
                                        .publish(TransportEnvelope::new(
                                            node_id,
                                            DISTRIBUTED_RESPONSE,
                                            encoded,
                                        ))
                                        .await
                                    {
                                        error!(
                                            "Failed to publish response for call {}: {e}",
                                            response.correlation_id
                                        );
                                    }
                                }
                                Err(e) => error!(
                                    "Failed to encode response for call {}: {e}",
                                    response.correlation_id
                                ),
                            }
                        });
                    }

                    DISTRIBUTED_RESPONSE => match messages::decode::<DistributedResponse>(
                        &envelope.payload,
                    ) {
                        Ok(response) => dispatcher.accept_response(response),
                        Err(e) => {
                            warn!("Dropping undecodable response from {}: {e}", envelope.sender);
                        }
                    },

                    NODE_REGISTER => match messages::decode::<NodeRegister>(&envelope.payload) {
                        Ok(register) => membership.apply_register(register.record),
                        Err(e) => {
                            warn!("Dropping undecodable register from {}: {e}", envelope.sender);
                        }
                    },

                    NODE_UNREGISTER => match messages::decode::<NodeUnregister>(&envelope.payload)
                    {
                        Ok(unregister) => membership.apply_unregister(&unregister.record.node_id),
                        Err(e) => warn!(
                            "Dropping undecodable unregister from {}: {e}",
                            envelope.sender
                        ),
                    },

                    other => warn!(
                        "Unknown message type '{}' from {}",
                        other, envelope.sender
                    ),
                }
            }
        });
    }
}
