//! Peer Record Store: the shared key-value store as seen by the coordinator.
//!
//! Implementations of `KeyValueStore`:
//! - `InMemoryStore` - For testing and single-process deployments
//! - `RedisStore` (in distributor-daemon) - Shared Redis instance
//!
//! `PeerStore` layers the key namespace, JSON encoding and a per-operation
//! timeout on top of whichever backend it is given.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::error::{PresenceError, StoreError};
use crate::peer::{Peer, SessionKey};

/// Namespace prefix shared by peer records and channel names.
pub const KEY_PREFIX: &str = "distributor";

/// Default bound on a single store operation.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

pub type Result<T> = std::result::Result<T, StoreError>;

/// Minimal string key-value store with last-writer-wins semantics per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store a value, overwriting any previous one
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Fetch a value (None if absent)
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove a value (succeeds if absent)
    async fn del(&self, key: &str) -> Result<()>;
}

/// In-memory key-value store
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

/// Storage key for a session's peer record.
pub fn record_key(session: &SessionKey) -> String {
    format!("{}:{}", KEY_PREFIX, session)
}

/// Typed access to peer records, one per session.
///
/// The only writer of `distributor:<sessionKey>` keys. Every call completes
/// or fails before returning; expiry of the timeout counts as a failure.
#[derive(Clone)]
pub struct PeerStore {
    backend: Arc<dyn KeyValueStore>,
    timeout: Duration,
}

impl PeerStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::with_timeout(backend, DEFAULT_STORE_TIMEOUT)
    }

    pub fn with_timeout(backend: Arc<dyn KeyValueStore>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Store the full record, replacing any previous one.
    pub async fn put(
        &self,
        session: &SessionKey,
        peer: &Peer,
    ) -> std::result::Result<(), PresenceError> {
        let value = serde_json::to_string(peer)
            .map_err(|e| PresenceError::Malformed(format!("Failed to encode peer: {}", e)))?;
        self.bounded("SET", self.backend.set(&record_key(session), value))
            .await
    }

    /// Fetch the full record.
    ///
    /// Absent and undecodable records are both `NotFound`.
    pub async fn get(&self, session: &SessionKey) -> std::result::Result<Peer, PresenceError> {
        let raw = match self.timed("GET", self.backend.get(&record_key(session))).await? {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(PresenceError::NotFound(session.clone())),
            Err(StoreError::Undecodable(detail)) => {
                debug!("Undecodable peer record for {}: {}", session, detail);
                return Err(PresenceError::NotFound(session.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&raw).map_err(|e| {
            debug!("Undecodable peer record for {}: {}", session, e);
            PresenceError::NotFound(session.clone())
        })
    }

    /// Remove the record. Removing an absent record succeeds.
    pub async fn delete(&self, session: &SessionKey) -> std::result::Result<(), PresenceError> {
        self.bounded("DEL", self.backend.del(&record_key(session)))
            .await
    }

    async fn bounded<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, PresenceError> {
        self.timed(op, fut).await?.map_err(PresenceError::from)
    }

    /// Run `fut` under the store timeout, leaving its own error untouched.
    async fn timed<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<Result<T>, PresenceError> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            PresenceError::Unavailable(format!("{} timed out after {:?}", op, self.timeout))
        })
    }
}
