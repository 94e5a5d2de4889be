//! Correlation ID for request/reply matching.
//!
//! Rendered on the wire as `request#<uuid>` in the broker's native
//! `correlation_id` property and echoed back unchanged by responders.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Prefix every correlation id carries on the wire.
pub const CORRELATION_PREFIX: &str = "request#";

/// Error returned when inbound metadata does not hold a correlation id
/// this client could have produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationIdError {
    #[error("correlation id is missing the `request#` prefix: {0:?}")]
    MissingPrefix(String),
    #[error("correlation id carries an invalid uuid: {0:?}")]
    InvalidUuid(String),
}

/// Correlation ID for tracking one request through the broker.
///
/// Backed by a random (v4) UUID, so ids are unique among all outstanding
/// calls of every client instance without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse the wire form (`request#<uuid>`)
    pub fn parse(s: &str) -> Result<Self, CorrelationIdError> {
        let raw = s
            .strip_prefix(CORRELATION_PREFIX)
            .ok_or_else(|| CorrelationIdError::MissingPrefix(s.to_string()))?;
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| CorrelationIdError::InvalidUuid(s.to_string()))
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CORRELATION_PREFIX, self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = CorrelationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = CorrelationIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.to_string()
    }
}
