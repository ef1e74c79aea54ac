//! Error taxonomy for presence handling.
//!
//! Every failure a handler can hit is one of these. Handlers never let them
//! escape: they are rendered into a failure `Response` instead.

use serde_json::{json, Value};
use thiserror::Error;

use crate::peer::SessionKey;

/// Errors raised by the backing key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The stored bytes could not be read back as text.
    #[error("Undecodable value: {0}")]
    Undecodable(String),
}

/// Errors raised by a channel membership backend.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connection {0} is closed")]
    ConnectionClosed(SessionKey),

    #[error("Channel operation failed: {0}")]
    Failed(String),
}

/// Errors surfaced to peers in failure responses.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Record missing or undecodable on a read that required prior registration.
    #[error("No peer registered for session {0}")]
    NotFound(SessionKey),

    /// The store operation failed or did not complete in time.
    #[error("Peer store unavailable: {0}")]
    Unavailable(String),

    /// Payload missing required fields or carrying the wrong types.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl From<StoreError> for PresenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) | StoreError::Undecodable(msg) => {
                PresenceError::Unavailable(msg)
            }
        }
    }
}

impl PresenceError {
    /// Short machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            PresenceError::NotFound(_) => "NotFound",
            PresenceError::Unavailable(_) => "StoreUnavailable",
            PresenceError::Malformed(_) => "Malformed",
            PresenceError::Channel(_) => "ChannelFailure",
        }
    }

    /// Structured rendering attached to failure responses as `error.data`.
    pub fn to_data(&self) -> Value {
        match self {
            PresenceError::NotFound(session) => json!({
                "kind": self.kind(),
                "sessionKey": session.as_str(),
            }),
            PresenceError::Unavailable(detail) | PresenceError::Malformed(detail) => json!({
                "kind": self.kind(),
                "detail": detail,
            }),
            PresenceError::Channel(err) => json!({
                "kind": self.kind(),
                "detail": err.to_string(),
            }),
        }
    }
}
