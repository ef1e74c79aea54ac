//! distributor-daemon: WebSocket front end for the video distribution swarm.
//!
//! Peers connect, register the videos they serve, and report liveness and
//! load. Peer records live in Redis (or memory) keyed by connection session.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use distributor_core::{ChannelRegistry, PeerStore, PresenceService};
use distributor_daemon::{Cli, DaemonConfig, Gateway};

#[tokio::main]
async fn main() -> Result<()> {
    let config = DaemonConfig::from(Cli::parse());

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting distributor-daemon");
    info!("Listen address: {}", config.listen);
    info!("Store timeout: {:?}", config.store_timeout);

    let backend = config.open_store().await?;
    let store = PeerStore::with_timeout(backend, config.store_timeout);
    let channels = Arc::new(ChannelRegistry::new());
    let gateway = Gateway::new(PresenceService::new(store, channels.clone()), channels);

    let listener = Gateway::bind(&config.listen).await?;

    info!("Daemon running. Press Ctrl+C to stop.");

    tokio::select! {
        result = gateway.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down");
    Ok(())
}
