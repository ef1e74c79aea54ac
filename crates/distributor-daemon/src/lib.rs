//! distributor-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod connection;
pub mod envelope;
pub mod gateway;
pub mod redis_store;

// Re-export key types for convenience
pub use config::{Cli, DaemonConfig, StoreBackend};
pub use connection::ClientConnection;
pub use envelope::{Envelope, Outbound, MAX_MESSAGE_SIZE};
pub use gateway::Gateway;
pub use redis_store::RedisStore;
