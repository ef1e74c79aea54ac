//! Wire envelopes.
//!
//! Every frame is UTF-8 JSON. Peers send `Envelope`s naming an event; the
//! daemon sends `Outbound` messages tagged by `type`.

use distributor_core::{Response, SessionKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum inbound frame size (64KB). Presence payloads are small.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Action reported for frames that could not be decoded as an envelope.
pub const INVALID_ACTION: &str = "invalid";

/// Inbound event from a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, e.g. "heartbeat"
    pub event: String,

    /// Event payload (null if omitted)
    #[serde(default)]
    pub data: Value,

    /// Request id echoed in the acknowledgement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl Envelope {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
            id: None,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Parse an envelope from a raw frame.
    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("Envelope serialization should not fail")
    }
}

/// Message sent from the daemon to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    /// First frame on every connection
    Connected {
        #[serde(rename = "sessionKey")]
        session_key: SessionKey,
    },
    /// Response to one inbound event
    Ack {
        id: Option<u64>,
        response: Response,
    },
    /// Message published to a video channel
    Broadcast { channel: String, data: Value },
}

impl Outbound {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("Outbound serialization should not fail")
    }

    pub fn from_text(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
