//! Presence protocol events and responses.
//!
//! Payloads are JSON objects with camelCase fields. They are decoded into
//! typed structs at the boundary so a missing or ill-typed field is reported
//! as `Malformed` instead of failing somewhere inside a handler.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::PresenceError;
use crate::peer::PeerStats;

/// Names of the events a connection may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    PeerRegistration,
    Heartbeat,
    VideosUpdate,
    Farewell,
}

impl EventName {
    pub const ALL: [EventName; 4] = [
        EventName::PeerRegistration,
        EventName::Heartbeat,
        EventName::VideosUpdate,
        EventName::Farewell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::PeerRegistration => "peer-registration",
            EventName::Heartbeat => "heartbeat",
            EventName::VideosUpdate => "videos-update",
            EventName::Farewell => "farewell",
        }
    }
}

impl Display for EventName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = PresenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| PresenceError::Malformed(format!("Unknown event: {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    pub peer_id: String,
    #[serde(default)]
    pub videos: Vec<String>,
    #[serde(default)]
    pub simultaneous: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub peer_id: String,
    #[serde(default)]
    pub remove_videos: Option<Vec<String>>,
    #[serde(default)]
    pub add_videos: Option<Vec<String>>,
    pub stats: PeerStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideosUpdatePayload {
    #[serde(default)]
    pub remove_videos: Option<Vec<String>>,
    #[serde(default)]
    pub add_videos: Option<Vec<String>>,
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Registration(RegistrationPayload),
    Heartbeat(HeartbeatPayload),
    VideosUpdate(VideosUpdatePayload),
    Farewell,
}

impl PresenceEvent {
    pub fn name(&self) -> EventName {
        match self {
            PresenceEvent::Registration(_) => EventName::PeerRegistration,
            PresenceEvent::Heartbeat(_) => EventName::Heartbeat,
            PresenceEvent::VideosUpdate(_) => EventName::VideosUpdate,
            PresenceEvent::Farewell => EventName::Farewell,
        }
    }

    /// Decode the payload of the named event.
    ///
    /// A null payload counts as an empty object, so `farewell` and
    /// `videos-update` may be sent without one.
    pub fn decode(event: &str, data: Value) -> Result<Self, PresenceError> {
        let name: EventName = event.parse()?;
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };

        Ok(match name {
            EventName::PeerRegistration => PresenceEvent::Registration(payload(name, data)?),
            EventName::Heartbeat => PresenceEvent::Heartbeat(payload(name, data)?),
            EventName::VideosUpdate => PresenceEvent::VideosUpdate(payload(name, data)?),
            EventName::Farewell => PresenceEvent::Farewell,
        })
    }
}

fn payload<T: DeserializeOwned>(name: EventName, data: Value) -> Result<T, PresenceError> {
    serde_json::from_value(data)
        .map_err(|e| PresenceError::Malformed(format!("Invalid {} payload: {}", name, e)))
}

/// Error details carried by a failure response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reply to every inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub action: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn ok(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            success: true,
            error: None,
        }
    }

    pub fn failure(action: impl Into<String>, err: &PresenceError) -> Self {
        Self {
            action: action.into(),
            success: false,
            error: Some(ResponseError {
                message: err.to_string(),
                data: Some(err.to_data()),
            }),
        }
    }

    /// Error class of a failure response, if any.
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref()?.data.as_ref()?.get("kind")?.as_str()
    }
}
