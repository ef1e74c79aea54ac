//! Channel Membership Manager.
//!
//! One broadcast channel exists per video id. A connection's membership is
//! never tracked as deltas: after every event touching the video list,
//! `reassert_channels` makes it equal to the record's `videos` set.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ChannelError;
use crate::peer::SessionKey;
use crate::session::Session;
use crate::store::KEY_PREFIX;

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Deterministic channel name for a video.
pub fn channel_name(video_id: &str) -> String {
    format!("{}:{}", KEY_PREFIX, video_id)
}

/// Channel subscriptions of transport connections.
#[async_trait]
pub trait ChannelMembership: Send + Sync {
    /// Subscribe the connection to the video's channel (no-op if already a member)
    async fn join(&self, session: &Session, video_id: &str) -> Result<()>;

    /// Unsubscribe the connection (no-op if not a member)
    async fn leave(&self, session: &Session, video_id: &str) -> Result<()>;

    /// Video ids whose channels the connection is currently in
    async fn joined(&self, session: &Session) -> Result<Vec<String>>;
}

/// Make the connection's membership exactly `videos`.
///
/// Joins every listed video (duplicates are harmless, join is idempotent)
/// and leaves every joined channel whose video is no longer listed.
pub async fn reassert_channels(
    channels: &dyn ChannelMembership,
    session: &Session,
    videos: &[String],
) -> Result<()> {
    for video_id in videos {
        channels.join(session, video_id).await?;
    }

    for video_id in channels.joined(session).await? {
        if !videos.contains(&video_id) {
            channels.leave(session, &video_id).await?;
        }
    }

    Ok(())
}

#[derive(Default)]
struct Memberships {
    /// Channel name -> member connections and their outboxes
    channels: HashMap<String, HashMap<SessionKey, mpsc::UnboundedSender<String>>>,
    /// Connection -> video ids joined
    by_session: HashMap<SessionKey, BTreeSet<String>>,
}

/// In-process channel registry backing the WebSocket transport.
///
/// Thread-safe for use in multi-threaded Tokio runtime.
/// Wrap in `Arc` for shared ownership.
#[derive(Default)]
pub struct ChannelRegistry {
    inner: RwLock<Memberships>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections currently in the video's channel, sorted.
    pub fn members(&self, video_id: &str) -> Vec<SessionKey> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut members: Vec<SessionKey> = inner
            .channels
            .get(&channel_name(video_id))
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Video ids the connection is in, sorted.
    pub fn videos_of(&self, session: &SessionKey) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .by_session
            .get(session)
            .map(|videos| videos.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of channels with at least one member.
    pub fn channel_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .channels
            .len()
    }

    /// Send a frame to every member of the video's channel, optionally skipping one.
    ///
    /// Returns the number of connections the frame was queued for.
    pub fn broadcast(&self, video_id: &str, frame: &str, except: Option<&SessionKey>) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let Some(members) = inner.channels.get(&channel_name(video_id)) else {
            return 0;
        };

        let mut sent = 0;
        for (key, outbox) in members {
            if Some(key) == except {
                continue;
            }
            if outbox.send(frame.to_string()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Drop every membership held by a closed connection.
    pub fn drop_connection(&self, session: &SessionKey) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(videos) = inner.by_session.remove(session) else {
            return;
        };

        for video_id in videos {
            let name = channel_name(&video_id);
            if let Some(members) = inner.channels.get_mut(&name) {
                members.remove(session);
                if members.is_empty() {
                    inner.channels.remove(&name);
                }
            }
        }
        debug!("Dropped channel membership for {}", session);
    }
}

#[async_trait]
impl ChannelMembership for ChannelRegistry {
    async fn join(&self, session: &Session, video_id: &str) -> Result<()> {
        if session.outbox().is_closed() {
            return Err(ChannelError::ConnectionClosed(session.key().clone()));
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .channels
            .entry(channel_name(video_id))
            .or_default()
            .insert(session.key().clone(), session.outbox().clone());
        inner
            .by_session
            .entry(session.key().clone())
            .or_default()
            .insert(video_id.to_string());
        Ok(())
    }

    async fn leave(&self, session: &Session, video_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let name = channel_name(video_id);

        if let Some(members) = inner.channels.get_mut(&name) {
            members.remove(session.key());
            if members.is_empty() {
                inner.channels.remove(&name);
            }
        }
        if let Some(videos) = inner.by_session.get_mut(session.key()) {
            videos.remove(video_id);
            if videos.is_empty() {
                inner.by_session.remove(session.key());
            }
        }
        Ok(())
    }

    async fn joined(&self, session: &Session) -> Result<Vec<String>> {
        Ok(self.videos_of(session.key()))
    }
}
