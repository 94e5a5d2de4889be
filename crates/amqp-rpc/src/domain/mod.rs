//! Domain layer: pure types, no I/O.

pub mod config;
pub mod correlation;
pub mod error;
pub mod message;
pub mod registry;

pub use config::{ClientConfig, ConfigError};
pub use correlation::{CorrelationId, CorrelationIdError};
pub use error::{ConnectionError, RegistryError, RpcError, TransportError};
pub use message::{OutboundMessage, Target, JSON_CONTENT_TYPE};
pub use registry::{CorrelationRegistry, PendingCall, RegistryStats, Reply};
