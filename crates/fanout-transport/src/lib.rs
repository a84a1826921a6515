//! Pub/sub transport abstraction for the fanout engine
//!
//! The engine assumes only "reliable-enough" broadcast semantics from the
//! transport: unordered delivery, at-least-once per subscriber, no built-in
//! request/response pairing. Pairing is implemented entirely by the engine
//! via correlation ids, so transports stay simple: publish an envelope to
//! every subscriber and expose the inbound stream.

pub mod error;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use fanout_topology::NodeId;
use futures::Stream;

pub use error::TransportError;

/// Message kind of a distributed request broadcast
pub const DISTRIBUTED_REQUEST: &str = "distributed-request";
/// Message kind of a per-node distributed response
pub const DISTRIBUTED_RESPONSE: &str = "distributed-response";
/// Message kind of a node register broadcast
pub const NODE_REGISTER: &str = "node-register";
/// Message kind of a node unregister broadcast
pub const NODE_UNREGISTER: &str = "node-unregister";

/// Transport-level message envelope
#[derive(Debug, Clone)]
pub struct TransportEnvelope {
    /// The node that published the envelope
    pub sender: NodeId,
    /// Message kind, one of the `*_REQUEST`/`*_RESPONSE`/register constants
    pub message_type: String,
    /// Encoded message payload
    pub payload: Bytes,
}

impl TransportEnvelope {
    /// Create an envelope
    pub fn new(sender: NodeId, message_type: impl Into<String>, payload: Bytes) -> Self {
        Self {
            sender,
            message_type: message_type.into(),
            payload,
        }
    }
}

/// Broadcast pub/sub transport.
///
/// Publishing is post-and-forget: a successful return means the envelope was
/// handed to the bus, not that any subscriber processed it. Subscribers see
/// every published envelope, including their own.
#[async_trait]
pub trait PubSubTransport: Send + Sync + 'static {
    /// Publish an envelope to every subscriber
    async fn publish(&self, envelope: TransportEnvelope) -> Result<(), TransportError>;

    /// Stream of inbound envelopes for this node
    fn incoming(&self) -> Pin<Box<dyn Stream<Item = TransportEnvelope> + Send>>;

    /// Shutdown the transport
    async fn shutdown(&self) -> Result<(), TransportError>;
}
