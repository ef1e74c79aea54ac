//! Command line and environment configuration.

use anyhow::Result;
use clap::Parser;
use distributor_core::{InMemoryStore, KeyValueStore, DEFAULT_STORE_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::redis_store::RedisStore;

#[derive(Parser, Debug)]
#[command(name = "distributor-daemon")]
#[command(about = "Peer presence and channel membership coordinator for video distribution")]
pub struct Cli {
    /// Address to listen on for peer connections
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "DISTRIBUTOR_LISTEN")]
    pub listen: String,

    /// Redis URL for the shared peer store (in-memory store if omitted)
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Timeout for a single store operation, in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_STORE_TIMEOUT.as_millis() as u64,
        env = "DISTRIBUTOR_STORE_TIMEOUT_MS"
    )]
    pub store_timeout_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Where peer records are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local map; records are not shared with other instances
    Memory,
    Redis(String),
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub listen: String,
    pub store: StoreBackend,
    pub store_timeout: Duration,
    pub verbose: bool,
}

impl From<Cli> for DaemonConfig {
    fn from(cli: Cli) -> Self {
        Self {
            listen: cli.listen,
            store: match cli.redis_url {
                Some(url) if !url.trim().is_empty() => StoreBackend::Redis(url),
                _ => StoreBackend::Memory,
            },
            store_timeout: Duration::from_millis(cli.store_timeout_ms),
            verbose: cli.verbose,
        }
    }
}

impl DaemonConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "debug,distributor_daemon=debug,distributor_core=debug"
        } else {
            "info,distributor_daemon=info,distributor_core=info"
        }
    }

    /// Open the configured key-value store.
    pub async fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        match &self.store {
            StoreBackend::Memory => {
                warn!("No Redis URL configured, peer records are kept in memory");
                Ok(Arc::new(InMemoryStore::new()))
            }
            StoreBackend::Redis(url) => {
                info!("Using Redis peer store");
                Ok(Arc::new(RedisStore::connect(url).await?))
            }
        }
    }
}
