//! # RPC Telemetry
//!
//! Logging setup shared by the binaries built on `amqp-rpc`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rpc_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&TelemetryConfig::from_env())?;
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RPC_SERVICE_NAME` | `amqp-rpc` | Service name in log lines |
//! | `RPC_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `RPC_JSON_LOGS` | `false` (`true` in containers) | JSON output |
//! | `RPC_LOG_SOURCE` | `false` | File and line per event |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}
