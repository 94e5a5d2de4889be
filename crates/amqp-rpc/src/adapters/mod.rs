//! Adapters layer: broker implementations of the outbound ports.

pub mod amqp;
pub mod memory;

pub use amqp::AmqpConnector;
pub use memory::InMemoryBroker;
