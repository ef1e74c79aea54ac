//! distributor-core: peer presence and channel-membership coordination.
//!
//! This crate provides the transport-agnostic core for:
//! - Peer records keyed by connection session, kept in a shared key-value store
//! - Per-video broadcast channel membership mirroring each peer's video list
//! - The presence protocol (registration, heartbeat, videos-update, farewell, disconnect)
//! - `KeyValueStore` and `ChannelMembership` trait abstractions

pub mod channels;
pub mod error;
pub mod peer;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod store;

pub use channels::{channel_name, reassert_channels, ChannelMembership, ChannelRegistry};
pub use error::{ChannelError, PresenceError, StoreError};
pub use peer::{Peer, PeerStats, SessionKey};
pub use presence::PresenceService;
pub use protocol::{EventName, PresenceEvent, Response, ResponseError};
pub use session::{Session, SessionState};
pub use store::{InMemoryStore, KeyValueStore, PeerStore, DEFAULT_STORE_TIMEOUT};
