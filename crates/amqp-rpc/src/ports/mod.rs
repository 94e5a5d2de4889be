//! Ports layer: trait seams between the client and its broker.

pub mod outbound;

pub use outbound::{
    BrokerConnector, BrokerLink, BrokerSession, DeliveryAck, DeliveryStream, InboundMessage,
};
