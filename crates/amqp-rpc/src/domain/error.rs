//! Error taxonomy of the RPC client.
//!
//! A missing reply is not an error: waiting operations return `None` and the
//! caller decides whether that means retry, fail fast or poll later.

use crate::domain::config::ConfigError;
use crate::domain::correlation::CorrelationId;
use thiserror::Error;

/// Opening the broker connection or its reply destination failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("invalid broker connection string: {0}")]
    InvalidDsn(String),
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("broker rejected the connection: {0}")]
    Rejected(String),
    #[error("reply destination setup failed: {0}")]
    ReplyDestination(String),
}

/// A failure on an established connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("connection to the broker is down")]
    Disconnected,
    #[error("reconnect failed")]
    Reconnect(#[source] ConnectionError),
    #[error("acknowledgement failed: {0}")]
    AckFailed(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("client is closed")]
    Closed,
}

/// Correlation registry invariant violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("correlation id {0} is already registered")]
    DuplicateId(CorrelationId),
}

/// Errors surfaced by [`RpcClient`](crate::service::RpcClient) operations.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to encode request body")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode reply body")]
    Decode(#[source] serde_json::Error),
}
