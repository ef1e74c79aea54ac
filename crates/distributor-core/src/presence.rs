//! Presence Protocol Handler.
//!
//! Turns inbound connection events into peer record updates and channel
//! membership changes. Each handler run holds the session lock for its whole
//! read-modify-write cycle, so concurrent events on one connection never
//! interleave. Every failure becomes a failure `Response`; nothing escapes to
//! the connection layer.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channels::{reassert_channels, ChannelMembership};
use crate::error::PresenceError;
use crate::peer::Peer;
use crate::protocol::{
    HeartbeatPayload, PresenceEvent, RegistrationPayload, Response, VideosUpdatePayload,
};
use crate::session::{Session, SessionState};
use crate::store::PeerStore;

pub type Result<T> = std::result::Result<T, PresenceError>;

/// Coordinator for peer presence and channel membership.
#[derive(Clone)]
pub struct PresenceService {
    store: PeerStore,
    channels: Arc<dyn ChannelMembership>,
}

impl PresenceService {
    pub fn new(store: PeerStore, channels: Arc<dyn ChannelMembership>) -> Self {
        Self { store, channels }
    }

    pub fn store(&self) -> &PeerStore {
        &self.store
    }

    /// Decode and handle a raw event, always producing a response.
    pub async fn dispatch(&self, session: &Session, event: &str, data: Value) -> Response {
        match PresenceEvent::decode(event, data) {
            Ok(event) => self.handle(session, event).await,
            Err(e) => {
                warn!("Rejected {} from {}: {}", event, session.key(), e);
                Response::failure(event, &e)
            }
        }
    }

    /// Handle a decoded event, always producing a response.
    pub async fn handle(&self, session: &Session, event: PresenceEvent) -> Response {
        let action = event.name();
        let result = match event {
            PresenceEvent::Registration(payload) => self.register(session, payload).await,
            PresenceEvent::Heartbeat(payload) => self.heartbeat(session, payload).await,
            PresenceEvent::VideosUpdate(payload) => self.update_videos(session, payload).await,
            PresenceEvent::Farewell => self.farewell(session).await,
        };

        match result {
            Ok(()) => Response::ok(action.as_str()),
            Err(e) => {
                warn!("{} failed for {}: {}", action, session.key(), e);
                Response::failure(action.as_str(), &e)
            }
        }
    }

    /// Create (or replace) the session's peer record and join its channels.
    pub async fn register(&self, session: &Session, payload: RegistrationPayload) -> Result<()> {
        let mut state = session.lock().await;
        ensure_live(session, *state)?;

        let mut peer = Peer::new(payload.peer_id, payload.videos);
        peer.simultaneous = payload.simultaneous;

        let previous = self.channels.joined(session).await?;
        reassert_channels(self.channels.as_ref(), session, &peer.videos).await?;
        if let Err(e) = self.store.put(session.key(), &peer).await {
            // Membership must keep matching the record that is still stored
            let restored = reassert_channels(self.channels.as_ref(), session, &previous).await;
            if let Err(rollback) = restored {
                warn!("Failed to restore channels for {}: {}", session.key(), rollback);
            }
            return Err(e);
        }
        *state = SessionState::Registered;

        info!(
            "Registered peer {} on {} with {} video(s)",
            peer.peer_id,
            session.key(),
            peer.videos.len()
        );
        Ok(())
    }

    /// Apply a video delta, refresh channels and replace the stats snapshot.
    pub async fn heartbeat(&self, session: &Session, payload: HeartbeatPayload) -> Result<()> {
        let state = session.lock().await;
        ensure_live(session, *state)?;

        let mut peer = self.store.get(session.key()).await?;
        peer.apply_video_delta(
            payload.remove_videos.as_deref(),
            payload.add_videos.as_deref(),
        );
        reassert_channels(self.channels.as_ref(), session, &peer.videos).await?;
        peer.stats = Some(payload.stats);
        self.store.put(session.key(), &peer).await?;

        debug!(
            "Heartbeat from {} ({}): {} video(s)",
            payload.peer_id,
            session.key(),
            peer.videos.len()
        );
        Ok(())
    }

    /// Apply a video delta and refresh channels. Stats are left untouched.
    pub async fn update_videos(
        &self,
        session: &Session,
        payload: VideosUpdatePayload,
    ) -> Result<()> {
        let state = session.lock().await;
        ensure_live(session, *state)?;

        let mut peer = self.store.get(session.key()).await?;
        peer.apply_video_delta(
            payload.remove_videos.as_deref(),
            payload.add_videos.as_deref(),
        );
        reassert_channels(self.channels.as_ref(), session, &peer.videos).await?;
        self.store.put(session.key(), &peer).await?;

        debug!("Videos updated for {}: {:?}", session.key(), peer.videos);
        Ok(())
    }

    /// Acknowledge a farewell by re-storing the record unchanged.
    pub async fn farewell(&self, session: &Session) -> Result<()> {
        let state = session.lock().await;
        ensure_live(session, *state)?;

        let peer = self.store.get(session.key()).await?;
        self.store.put(session.key(), &peer).await?;

        info!("Farewell from {} ({})", peer.peer_id, session.key());
        Ok(())
    }

    /// Remove the session's record after the connection closed.
    ///
    /// Waits for any in-flight handler, then marks the session terminated so
    /// later events cannot recreate the record. Channel teardown is left to
    /// the transport. Failures are logged and swallowed.
    pub async fn disconnect(&self, session: &Session) {
        let mut state = session.lock().await;
        *state = SessionState::Terminated;

        match self.store.delete(session.key()).await {
            Ok(()) => info!("Removed peer record for {}", session.key()),
            Err(e) => warn!("Failed to remove peer record for {}: {}", session.key(), e),
        }
    }
}

fn ensure_live(session: &Session, state: SessionState) -> Result<()> {
    match state {
        SessionState::Terminated => Err(PresenceError::NotFound(session.key().clone())),
        SessionState::Unregistered | SessionState::Registered => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelRegistry;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn service() -> (PresenceService, Arc<ChannelRegistry>) {
        let channels = Arc::new(ChannelRegistry::new());
        let store = PeerStore::new(Arc::new(InMemoryStore::new()));
        (PresenceService::new(store, channels.clone()), channels)
    }

    #[tokio::test]
    async fn test_registration_marks_session_registered() {
        let (service, _) = service();
        let (session, _rx) = Session::detached("s1");

        let response = service
            .dispatch(&session, "peer-registration", json!({"peerId": "p1", "videos": []}))
            .await;

        assert!(response.success);
        assert_eq!(session.state().await, SessionState::Registered);
    }

    #[tokio::test]
    async fn test_malformed_payload_response() {
        let (service, _) = service();
        let (session, _rx) = Session::detached("s1");

        let response = service.dispatch(&session, "heartbeat", json!({"peerId": 5})).await;

        assert_eq!(response.action, "heartbeat");
        assert!(!response.success);
        assert_eq!(response.error_kind(), Some("Malformed"));
    }

    #[tokio::test]
    async fn test_events_after_disconnect_are_rejected() {
        let (service, channels) = service();
        let (session, _rx) = Session::detached("s1");

        service.disconnect(&session).await;
        let response = service
            .dispatch(&session, "peer-registration", json!({"peerId": "p1", "videos": ["v1"]}))
            .await;

        assert!(!response.success);
        assert_eq!(response.error_kind(), Some("NotFound"));
        assert!(channels.members("v1").is_empty());
        assert!(service.store().get(session.key()).await.is_err());
    }

    #[tokio::test]
    async fn test_farewell_keeps_record() {
        let (service, _) = service();
        let (session, _rx) = Session::detached("s1");
        service
            .dispatch(&session, "peer-registration", json!({"peerId": "p1", "videos": ["v1"]}))
            .await;

        let response = service.dispatch(&session, "farewell", json!({})).await;

        assert!(response.success);
        let peer = service.store().get(session.key()).await.unwrap();
        assert_eq!(peer.videos, vec!["v1".to_string()]);
    }
}
