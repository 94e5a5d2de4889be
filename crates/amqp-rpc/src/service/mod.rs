//! Service layer: the running client and its background tasks.

pub mod client;
pub mod connection;
pub mod pump;
pub mod reaper;

pub use client::RpcClient;
pub use connection::ConnectionManager;
pub use pump::ReplyPump;
pub use reaper::reaper_task;
