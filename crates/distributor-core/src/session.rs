//! Explicit per-connection session handle.
//!
//! The gateway creates one `Session` per accepted connection and passes a
//! clone into every handler call. Clones share the same state lock, so all
//! handler runs for one connection are serialized.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard};

use crate::peer::SessionKey;

/// Lifecycle of a connection as seen by the presence handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no successful registration yet
    Unregistered,
    /// At least one registration succeeded
    Registered,
    /// Disconnected; no further events are processed
    Terminated,
}

/// Handle to one live connection.
#[derive(Debug, Clone)]
pub struct Session {
    key: SessionKey,
    outbox: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    /// Create a session whose outgoing frames are written to `outbox`.
    pub fn new(key: SessionKey, outbox: mpsc::UnboundedSender<String>) -> Self {
        Self {
            key,
            outbox,
            state: Arc::new(Mutex::new(SessionState::Unregistered)),
        }
    }

    /// Create a session with a detached outbox, returning the receiving end.
    pub fn detached(key: impl Into<SessionKey>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(key.into(), tx), rx)
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn outbox(&self) -> &mpsc::UnboundedSender<String> {
        &self.outbox
    }

    /// Queue a text frame for the connection. Returns false once it has closed.
    pub fn send(&self, frame: String) -> bool {
        self.outbox.send(frame).is_ok()
    }

    /// Acquire exclusive access to the session for one handler run.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Current state (waits for any in-flight handler to finish).
    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }
}
