//! Redis-backed `KeyValueStore`.
//!
//! Uses a `ConnectionManager`, which reconnects on its own; a command that
//! fails while the server is unreachable surfaces as `StoreError::Unavailable`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use distributor_core::store::Result as StoreResult;
use distributor_core::{KeyValueStore, StoreError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use tracing::info;

/// Shared Redis instance holding peer records.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. "redis://127.0.0.1:6379").
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("Invalid Redis URL: {}", url))?;
        let conn = ConnectionManager::new(client)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", url))?;
        info!("Connected to Redis at {}", url);
        Ok(Self { conn })
    }
}

fn unavailable(err: RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Non-text bytes are an undecodable value, not a failed command.
fn decode_value(raw: Option<Vec<u8>>) -> StoreResult<Option<String>> {
    raw.map(|bytes| {
        String::from_utf8(bytes).map_err(|e| StoreError::Undecodable(e.to_string()))
    })
    .transpose()
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(unavailable)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let raw = conn
            .get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(unavailable)?;
        decode_value(raw)
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(unavailable)
    }
}
