//! Connection Gateway: accepts WebSocket connections and binds them to the
//! presence handler.
//!
//! Each accepted connection gets a fresh session key and `Session`. Every
//! inbound frame is handled on its own task; the session lock inside
//! `PresenceService` keeps them from interleaving. When the connection
//! closes, the peer record is deleted and channel membership torn down.

use anyhow::Result;
use distributor_core::{
    channel_name, ChannelRegistry, PresenceError, PresenceService, Response, Session, SessionKey,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info};

use crate::connection::ClientConnection;
use crate::envelope::{Envelope, Outbound, INVALID_ACTION};

/// Gateway shared by every connection task.
#[derive(Clone)]
pub struct Gateway {
    service: PresenceService,
    channels: Arc<ChannelRegistry>,
    active: Arc<AtomicUsize>,
}

impl Gateway {
    pub fn new(service: PresenceService, channels: Arc<ChannelRegistry>) -> Self {
        Self {
            service,
            channels,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn service(&self) -> &PresenceService {
        &self.service
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Gateway listening on {}", listen_addr);
        Ok(listener)
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let gateway = self.clone();
                    tokio::spawn(async move {
                        gateway.accept_connection(stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Run one connection until it closes.
    pub async fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                // Health checks (like `nc -z`) connect and close without
                // completing the WebSocket handshake.
                let err_str = e.to_string();
                if err_str.contains("Handshake not finished")
                    || err_str.contains("Connection reset")
                    || err_str.contains("unexpected EOF")
                {
                    debug!("Connection closed before handshake from {}", addr);
                } else {
                    error!("WebSocket upgrade failed for {}: {}", addr, e);
                }
                return;
            }
        };

        let key = SessionKey::new(uuid::Uuid::new_v4().to_string());
        let mut conn = ClientConnection::new(key.clone(), ws_stream);
        let session = conn.session().clone();

        self.active.fetch_add(1, Ordering::SeqCst);
        info!("New connection from {} (session: {})", addr, key);

        session.send(
            Outbound::Connected {
                session_key: key.clone(),
            }
            .to_text(),
        );

        while let Some(data) = conn.next_frame().await {
            let service = self.service.clone();
            let session = session.clone();
            tokio::spawn(async move {
                handle_frame(&service, &session, &data).await;
            });
        }

        self.service.disconnect(&session).await;
        self.channels.drop_connection(&key);
        self.active.fetch_sub(1, Ordering::SeqCst);
        info!("Connection closed: {} (session: {})", addr, key);
    }

    /// Publish data to every connection in a video's channel.
    ///
    /// Returns the number of connections the message was queued for.
    pub fn broadcast(&self, video_id: &str, data: Value, except: Option<&SessionKey>) -> usize {
        let frame = Outbound::Broadcast {
            channel: channel_name(video_id),
            data,
        }
        .to_text();
        self.channels.broadcast(video_id, &frame, except)
    }
}

/// Decode one frame, run it through the presence handler and queue the ack.
pub async fn handle_frame(service: &PresenceService, session: &Session, data: &[u8]) {
    let (id, response) = match Envelope::from_slice(data) {
        Ok(envelope) => {
            debug!("{} from {}", envelope.event, session.key());
            let response = service
                .dispatch(session, &envelope.event, envelope.data)
                .await;
            (envelope.id, response)
        }
        Err(e) => {
            debug!("Undecodable frame from {}: {}", session.key(), e);
            let err = PresenceError::Malformed(e.to_string());
            (None, Response::failure(INVALID_ACTION, &err))
        }
    };

    if !session.send(Outbound::Ack { id, response }.to_text()) {
        debug!("Dropped ack for closed session {}", session.key());
    }
}
