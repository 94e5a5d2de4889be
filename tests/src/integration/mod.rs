//! End-to-end tests against the in-memory broker.

pub mod properties;
pub mod resilience;
