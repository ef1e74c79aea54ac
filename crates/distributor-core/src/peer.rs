//! Peer record and session identity.
//!
//! A `Peer` is keyed by the `SessionKey` of the connection that registered it,
//! not by its caller-supplied `peer_id`, which is not unique across sessions.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Unique identifier of one live transport connection.
///
/// This is the storage key for the peer record and the true identity of a
/// peer for the lifetime of its connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Last load snapshot reported by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerStats {
    pub cpu: f64,
    pub ram: f64,
    pub connections: u64,
}

/// Persisted presence record for one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Caller-supplied logical identity
    pub peer_id: String,
    /// Video ids served or watched; mirrors the connection's channel membership
    #[serde(default)]
    pub videos: Vec<String>,
    /// Selection eligibility, owned by external policy
    #[serde(default = "default_enabled", alias = "enable")]
    pub enabled: bool,
    /// Maximum concurrent streams the peer will serve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simultaneous: Option<u32>,
    /// Absent until the first heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PeerStats>,
}

fn default_enabled() -> bool {
    true
}

impl Peer {
    pub fn new(peer_id: impl Into<String>, videos: Vec<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            videos,
            enabled: true,
            simultaneous: None,
            stats: None,
        }
    }

    /// Apply a remove-then-add change to the video list.
    ///
    /// `remove: None` keeps everything and `add: None` appends nothing.
    /// Because removal runs first, an id present in both lists survives.
    /// Added ids are appended as given, without deduplication.
    pub fn apply_video_delta(&mut self, remove: Option<&[String]>, add: Option<&[String]>) {
        if let Some(remove) = remove {
            self.videos.retain(|video| !remove.contains(video));
        }
        if let Some(add) = add {
            self.videos.extend(add.iter().cloned());
        }
    }
}
