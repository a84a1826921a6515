//! In-memory pub/sub transport for the fanout engine
//!
//! Routes broadcast envelopes between nodes within the same process, perfect
//! for testing and development scenarios. Every registered node receives
//! every published envelope, including the publisher itself.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use fanout_topology::NodeId;
use fanout_transport::{PubSubTransport, TransportEnvelope, TransportError};
use futures::Stream;
use parking_lot::RwLock;
use tracing::{debug, info};

/// Global registry of per-node inboxes for cross-node routing
static GLOBAL_REGISTRY: once_cell::sync::Lazy<Arc<DashMap<NodeId, flume::Sender<TransportEnvelope>>>> =
    once_cell::sync::Lazy::new(|| Arc::new(DashMap::new()));

/// Memory transport implementation
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    node_id: NodeId,
    receiver: flume::Receiver<TransportEnvelope>,
    closed: Arc<RwLock<bool>>,
}

impl MemoryTransport {
    /// Register a node on the in-process bus.
    ///
    /// Fails if another transport is already registered for the same node id.
    pub fn register(node_id: NodeId) -> Result<Self, TransportError> {
        if GLOBAL_REGISTRY.contains_key(&node_id) {
            return Err(TransportError::InvalidConfiguration(format!(
                "Node {node_id} is already registered on the memory bus"
            )));
        }

        let (sender, receiver) = flume::unbounded();
        GLOBAL_REGISTRY.insert(node_id.clone(), sender);
        info!("Memory transport registered for node {}", node_id);

        Ok(Self {
            node_id,
            receiver,
            closed: Arc::new(RwLock::new(false)),
        })
    }

    /// Clear all global state (useful for tests)
    pub fn clear_global_state() {
        GLOBAL_REGISTRY.clear();
    }

    /// The node this transport is registered for
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn publish(&self, envelope: TransportEnvelope) -> Result<(), TransportError> {
        if *self.closed.read() {
            return Err(TransportError::Closed);
        }

        debug!(
            "Node {} broadcasting '{}' ({} bytes)",
            self.node_id,
            envelope.message_type,
            envelope.payload.len()
        );

        for entry in GLOBAL_REGISTRY.iter() {
            // A dropped inbox just means that node has shut down.
            let _ = entry.value().send(envelope.clone());
        }

        Ok(())
    }

    fn incoming(&self) -> Pin<Box<dyn Stream<Item = TransportEnvelope> + Send>> {
        Box::pin(self.receiver.clone().into_stream())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        debug!("Shutting down memory transport for node {}", self.node_id);
        *self.closed.write() = true;
        GLOBAL_REGISTRY.remove(&self.node_id);
        Ok(())
    }
}
