//! Outbound ports: what the client needs from a message broker.
//!
//! A connector opens a [`BrokerSession`]: a publishing link bound to a
//! private reply destination, plus the stream of deliveries arriving on
//! that destination. The AMQP adapter and the in-memory broker both
//! implement these traits.

use crate::domain::{ConnectionError, OutboundMessage, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Acknowledges one delivery back to the broker.
#[async_trait]
pub trait DeliveryAck: Send + Sync {
    async fn ack(&self) -> Result<(), TransportError>;
}

/// A reply delivery as received on the reply destination.
pub struct InboundMessage {
    /// Raw `correlation_id` property, if the sender set one
    pub correlation_id: Option<String>,
    /// Reply body
    pub payload: Bytes,
    /// Ack token
    pub ack: Box<dyn DeliveryAck>,
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("correlation_id", &self.correlation_id)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Deliveries on the reply destination, in arrival order.
pub type DeliveryStream = BoxStream<'static, Result<InboundMessage, TransportError>>;

/// The publishing half of an open broker connection.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Name of the exclusive, auto-deleting reply destination.
    fn reply_destination(&self) -> &str;

    /// Whether connection and channel are still open.
    fn is_connected(&self) -> bool;

    /// Publish one request.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Close the connection. The broker deletes the reply destination.
    async fn close(&self) -> Result<(), TransportError>;
}

/// An open connection: its link and the deliveries of its reply destination.
pub struct BrokerSession {
    pub link: Box<dyn BrokerLink>,
    pub deliveries: DeliveryStream,
}

/// Opens broker sessions. Called once at connect time and again for each
/// reconnect.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<BrokerSession, ConnectionError>;
}
