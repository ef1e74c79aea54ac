//! Individual client connection management.
//!
//! Each connection wraps a WebSocket stream, split between a writer task
//! that drains the session outbox and a read half polled by the gateway.

use distributor_core::{Session, SessionKey};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::envelope::MAX_MESSAGE_SIZE;

/// A single WebSocket connection from a peer.
pub struct ClientConnection {
    session: Session,
    read: SplitStream<WebSocketStream<TcpStream>>,
    write_task: Option<JoinHandle<()>>,
}

impl ClientConnection {
    /// Create a connection from an upgraded WebSocket stream.
    ///
    /// Spawns a write task that forwards the session outbox to the socket.
    pub fn new(key: SessionKey, ws_stream: WebSocketStream<TcpStream>) -> Self {
        let (write, read) = ws_stream.split();
        let (outbox, rx) = mpsc::unbounded_channel();

        let write_key = key.clone();
        let write_task = tokio::spawn(async move {
            Self::write_loop(write_key, write, rx).await;
        });

        Self {
            session: Session::new(key, outbox),
            read,
            write_task: Some(write_task),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Write loop that sends queued frames as text messages.
    async fn write_loop(
        key: SessionKey,
        mut write: SplitSink<WebSocketStream<TcpStream>, Message>,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write.send(Message::Text(frame.into())).await {
                debug!("Stopped writing to {}: {}", key, e);
                break;
            }
        }
        let _ = write.close().await;
    }

    /// Wait for the next data frame.
    ///
    /// Control frames are skipped and oversized frames dropped. Returns None
    /// once the connection is closed.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        let key = self.session.key();
        loop {
            let data = match self.read.next().await {
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Binary(data))) => data.to_vec(),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame from {}", key);
                    return None;
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!("Connection {} closed", key);
                    return None;
                }
                Some(Err(e)) => {
                    error!("WebSocket error on {}: {}", key, e);
                    return None;
                }
                None => {
                    debug!("Connection {} stream ended", key);
                    return None;
                }
            };

            if data.len() > MAX_MESSAGE_SIZE {
                warn!(
                    "Message from {} exceeds max size ({} > {}), dropping",
                    key,
                    data.len(),
                    MAX_MESSAGE_SIZE
                );
                continue;
            }

            return Some(data);
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(task) = self.write_task.take() {
            task.abort();
        }
    }
}
