//! Message envelopes exchanged with the broker.

use crate::domain::correlation::CorrelationId;
use bytes::Bytes;
use std::fmt;

/// Content type set by the JSON helpers.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Where a request is published: an exchange plus an optional routing key.
///
/// An empty routing key is what fanout exchanges expect, so the sender does
/// not need to know which worker will answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Exchange name
    pub exchange: String,
    /// Routing key (empty for fanout)
    pub routing_key: String,
}

impl Target {
    /// Target an exchange with an empty routing key.
    pub fn exchange(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: String::new(),
        }
    }

    /// Set the routing key.
    #[must_use]
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }
}

impl From<&str> for Target {
    fn from(exchange: &str) -> Self {
        Self::exchange(exchange)
    }
}

impl From<String> for Target {
    fn from(exchange: String) -> Self {
        Self::exchange(exchange)
    }
}

impl From<(&str, &str)> for Target {
    fn from((exchange, routing_key): (&str, &str)) -> Self {
        Self::exchange(exchange).with_routing_key(routing_key)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.routing_key.is_empty() {
            write!(f, "{}", self.exchange)
        } else {
            write!(f, "{}/{}", self.exchange, self.routing_key)
        }
    }
}

/// A request as handed to the broker.
///
/// Built by the dispatcher while it holds the publish lock, so `reply_to`
/// always names the reply destination of the link it is published on.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Opaque request body
    pub payload: Bytes,
    /// Echoed back by the responder
    pub correlation_id: CorrelationId,
    /// Private reply destination of this client
    pub reply_to: String,
    /// Exchange and routing key
    pub target: Target,
    /// Optional MIME type of `payload`
    pub content_type: Option<String>,
}
