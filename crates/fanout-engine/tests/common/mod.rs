//! Shared helpers for engine integration tests

use std::time::Duration;

use fanout_engine::{
    ClusterNode, EngineConfig, NodeId, ResponderConfig, ResponderPolicy, node_record_schema,
};
use fanout_store::{EntitySchema, LocalStore, SchemaRegistry};
use fanout_store_memory::MemoryStore;
use fanout_transport_memory::MemoryTransport;
use once_cell::sync::Lazy;
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};

/// The memory bus is process-global, so tests that start nodes must not
/// overlap in time.
static BUS: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Take the bus for one test and reset it
pub async fn exclusive_bus() -> MutexGuard<'static, ()> {
    let guard = BUS.lock().await;
    MemoryTransport::clear_global_state();
    guard
}

pub fn schemas() -> SchemaRegistry {
    let mut schemas = SchemaRegistry::new();
    schemas.register(
        EntitySchema::new("user", "main", "id").with_fields(["name", "active", "score"]),
    );
    schemas.register(node_record_schema());
    schemas
}

/// A running in-process cluster
pub struct TestCluster {
    pub nodes: Vec<ClusterNode<MemoryTransport, MemoryStore>>,
}

impl TestCluster {
    /// Start `size` nodes named `{prefix}-0..` and wait until every node
    /// sees the full membership.
    pub async fn start(prefix: &str, size: usize) -> Self {
        let _ = tracing_subscriber::fmt::try_init();

        let mut nodes = Vec::with_capacity(size);
        for index in 0..size {
            let node_id = NodeId::new(format!("{prefix}-{index}"));
            let transport = MemoryTransport::register(node_id.clone()).expect("bus registration");
            let store = MemoryStore::new(schemas());
            let config = EngineConfig::new(node_id)
                .with_default_timeout(Duration::from_millis(500));
            nodes.push(ClusterNode::new(config, transport, store));
        }

        for node in &nodes {
            node.start().await.expect("node start");
        }
        let cluster = Self { nodes };
        for node in &cluster.nodes {
            wait_for_members(node, size).await;
        }
        cluster
    }

    pub fn node_id(&self, index: usize) -> NodeId {
        self.nodes[index].node_id().clone()
    }

    /// Seed each node's local store with `per_node` user rows.
    ///
    /// Row names are `{nodeId}-r{index}` so provenance is checkable from the
    /// record itself.
    pub async fn seed_users(&self, per_node: usize) {
        for node in &self.nodes {
            let rows = (0..per_node)
                .map(|index| {
                    json!({
                        "name": format!("{}-r{index}", node.node_id()),
                        "active": index % 2 == 0,
                        "score": index as u64,
                    })
                })
                .collect();
            node.store().save("user", rows).await.expect("seeding");
        }
    }

    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.shutdown().await.expect("node shutdown");
        }
    }
}

/// Start one extra node advertising a custom responder policy
pub async fn start_node_with_policy(
    node_id: NodeId,
    policy: ResponderPolicy,
) -> ClusterNode<MemoryTransport, MemoryStore> {
    let transport = MemoryTransport::register(node_id.clone()).expect("bus registration");
    let store = MemoryStore::new(schemas());
    let config = EngineConfig::new(node_id)
        .with_default_timeout(Duration::from_millis(500))
        .with_responder(ResponderConfig {
            concurrency: 1,
            policy,
        });
    let node = ClusterNode::new(config, transport, store);
    node.start().await.expect("node start");
    node
}

/// Poll until the node's view reaches the expected active member count
pub async fn wait_for_members(node: &ClusterNode<MemoryTransport, MemoryStore>, expected: usize) {
    for _ in 0..200 {
        if node.membership().list_active().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "node {} never saw {expected} members, view: {:?}",
        node.node_id(),
        node.membership().list_active()
    );
}
