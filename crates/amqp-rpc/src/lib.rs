#![allow(missing_docs)]

//! Request/reply RPC over a publish/subscribe broker (AMQP 0-9-1).
//!
//! Callers publish a request to an exchange and later collect the reply,
//! matched by correlation id, from a private reply queue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            RpcClient                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   send ──► register id ──► ConnectionManager ──► publish         │
//! │                 │             (one reconnect + retry)     │      │
//! │                 ▼                                         │      │
//! │   ┌──────────────────────────┐                            │      │
//! │   │   Correlation Registry   │◄── reaper (TTL eviction)   │      │
//! │   │  id → pending call slot  │                            │      │
//! │   └──────────────────────────┘                            │      │
//! │        ▲                 │                                │      │
//! │        │ fulfil          │ wait / take                    │      │
//! │   ┌────┴──────────┐      ▼                                │      │
//! │   │  Reply Pump   │   await_response / get_response       │      │
//! │   └────▲──────────┘                                       │      │
//! └────────┼──────────────────────────────────────────────────┼──────┘
//!          │ reply queue (exclusive, auto-delete)             ▼
//!     ─────┴──────────────────── Broker ──────────────── exchange ────►
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use amqp_rpc::{ClientConfig, RpcClient, Target};
//! use std::time::Duration;
//!
//! let client = RpcClient::connect(ClientConfig::new(dsn)).await?;
//! let id = client.send(r#"{"region":"north"}"#, Target::exchange("forecasts")).await?;
//! match client.await_response(&id, Duration::from_secs(240)).await {
//!     Some(reply) => handle(reply),
//!     None => retry_later(id),
//! }
//! client.close().await?;
//! ```
//!
//! # Guarantees
//!
//! - The id is registered before the request is published
//! - A reply is delivered to the waiter registered under its id and nobody else
//! - A timed-out call stays collectable until the TTL reaper evicts it

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

// Re-exports for public API
pub use adapters::{AmqpConnector, InMemoryBroker};
pub use domain::config::redact_dsn;
pub use domain::{
    ClientConfig, ConfigError, ConnectionError, CorrelationId, CorrelationIdError,
    CorrelationRegistry, OutboundMessage, RegistryError, RegistryStats, Reply, RpcError, Target,
    TransportError, JSON_CONTENT_TYPE,
};
pub use ports::{BrokerConnector, BrokerLink, BrokerSession, DeliveryStream, InboundMessage};
pub use service::RpcClient;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connect with default settings to the broker at `dsn`.
pub async fn connect(dsn: impl Into<String>) -> Result<RpcClient, RpcError> {
    RpcClient::connect(ClientConfig::new(dsn)).await
}
