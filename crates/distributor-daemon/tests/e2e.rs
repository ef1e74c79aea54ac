//! End-to-end tests for distributor-daemon.
//!
//! Tests the full gateway behavior over real WebSocket connections:
//! session assignment, presence events, acks and disconnect cleanup.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use distributor_core::{
    ChannelRegistry, InMemoryStore, PeerStore, PresenceError, PresenceService, Response,
    SessionKey,
};
use distributor_daemon::{Envelope, Gateway, Outbound};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Test client that connects to the gateway.
struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session_key: SessionKey,
    next_id: u64,
}

impl TestClient {
    /// Connect and wait for the session announcement.
    async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{}", addr);
        let (ws, _) = connect_async(&url).await.expect("Failed to connect");

        let mut client = Self {
            ws,
            session_key: SessionKey::from(""),
            next_id: 1,
        };

        match client.recv_outbound().await {
            Outbound::Connected { session_key } => client.session_key = session_key,
            other => panic!("Expected connected message, got {:?}", other),
        }

        client
    }

    /// Receive the next daemon message.
    async fn recv_outbound(&mut self) -> Outbound {
        let text = timeout(Duration::from_secs(2), self.recv_text())
            .await
            .expect("Timeout waiting for message");
        Outbound::from_text(&text).expect("Expected outbound message")
    }

    async fn recv_text(&mut self) -> String {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec()).expect("UTF-8 frame")
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => panic!("Connection closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {}", e),
                None => panic!("Stream ended unexpectedly"),
                _ => continue,
            }
        }
    }

    async fn send_text(&mut self, text: String) {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .expect("Failed to send message");
    }

    /// Send an event and return its request id without waiting.
    async fn emit(&mut self, event: &str, data: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.send_text(Envelope::new(event, data).with_id(id).to_text())
            .await;
        id
    }

    /// Wait for acks for all of `ids`, in any order.
    async fn acks(&mut self, ids: &[u64]) -> HashMap<u64, Response> {
        let mut acks = HashMap::new();
        while acks.len() < ids.len() {
            if let Outbound::Ack {
                id: Some(id),
                response,
            } = self.recv_outbound().await
            {
                if ids.contains(&id) {
                    acks.insert(id, response);
                }
            }
        }
        acks
    }

    /// Send an event and wait for its ack.
    async fn request(&mut self, event: &str, data: Value) -> Response {
        let id = self.emit(event, data).await;
        self.acks(&[id]).await.remove(&id).expect("ack present")
    }

    async fn register(&mut self, videos: &[&str]) -> Response {
        self.request(
            "peer-registration",
            json!({"peerId": "test-peer", "videos": videos}),
        )
        .await
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Start a gateway with an in-memory store on a random port.
async fn start_gateway() -> (Gateway, SocketAddr) {
    let channels = Arc::new(ChannelRegistry::new());
    let store = PeerStore::new(Arc::new(InMemoryStore::new()));
    let gateway = Gateway::new(PresenceService::new(store, channels.clone()), channels);

    let listener = Gateway::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let server = gateway.clone();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    (gateway, addr)
}

/// Poll a condition until it holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_sessions_get_distinct_keys() {
    let (gateway, addr) = start_gateway().await;

    let a = TestClient::connect(addr).await;
    let b = TestClient::connect(addr).await;

    assert_ne!(a.session_key, b.session_key);
    let gateway = &gateway;
    assert!(eventually(|| async move { gateway.connection_count() == 2 }).await);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_registration_creates_record_and_channels() {
    let (gateway, addr) = start_gateway().await;
    let mut client = TestClient::connect(addr).await;

    let response = client.register(&["v1", "v2"]).await;

    assert!(response.success, "registration failed: {:?}", response);
    assert_eq!(response.action, "peer-registration");
    let peer = gateway
        .service()
        .store()
        .get(&client.session_key)
        .await
        .expect("record stored");
    assert_eq!(peer.peer_id, "test-peer");
    assert_eq!(peer.videos, ids(&["v1", "v2"]));
    assert_eq!(
        gateway.channels().videos_of(&client.session_key),
        ids(&["v1", "v2"])
    );

    client.close().await;
}

#[tokio::test]
async fn test_heartbeat_before_registration_fails() {
    let (gateway, addr) = start_gateway().await;
    let mut client = TestClient::connect(addr).await;

    let response = client
        .request(
            "heartbeat",
            json!({"peerId": "test-peer", "stats": {"cpu": 1, "ram": 2, "connections": 0}}),
        )
        .await;

    assert!(!response.success);
    assert_eq!(response.error_kind(), Some("NotFound"));
    let err = gateway
        .service()
        .store()
        .get(&client.session_key)
        .await
        .unwrap_err();
    assert!(matches!(err, PresenceError::NotFound(_)));

    client.close().await;
}

#[tokio::test]
async fn test_heartbeat_remove_then_add() {
    let (gateway, addr) = start_gateway().await;
    let mut client = TestClient::connect(addr).await;
    client.register(&["v1", "v2"]).await;

    let response = client
        .request(
            "heartbeat",
            json!({
                "peerId": "test-peer",
                "removeVideos": ["v1"],
                "addVideos": ["v1", "v3"],
                "stats": {"cpu": 10.0, "ram": 20.0, "connections": 1}
            }),
        )
        .await;

    assert!(response.success);
    let peer = gateway
        .service()
        .store()
        .get(&client.session_key)
        .await
        .unwrap();
    assert_eq!(peer.videos, ids(&["v2", "v1", "v3"]));
    assert!(peer.stats.is_some());

    client.close().await;
}

#[tokio::test]
async fn test_back_to_back_updates_are_not_lost() {
    let (gateway, addr) = start_gateway().await;
    let mut client = TestClient::connect(addr).await;
    client.register(&[]).await;

    let first = client
        .emit(
            "heartbeat",
            json!({"peerId": "test-peer", "addVideos": ["va"], "stats": {"cpu": 0, "ram": 0, "connections": 0}}),
        )
        .await;
    let second = client
        .emit("videos-update", json!({"addVideos": ["vb"]}))
        .await;
    let acks = client.acks(&[first, second]).await;

    assert!(acks.values().all(|r| r.success));
    let mut videos = gateway
        .service()
        .store()
        .get(&client.session_key)
        .await
        .unwrap()
        .videos;
    videos.sort();
    assert_eq!(videos, ids(&["va", "vb"]));

    client.close().await;
}

#[tokio::test]
async fn test_farewell_acknowledged() {
    let (_gateway, addr) = start_gateway().await;
    let mut client = TestClient::connect(addr).await;
    client.register(&["v1"]).await;

    let response = client.request("farewell", json!({})).await;

    assert!(response.success);
    assert_eq!(response.action, "farewell");

    client.close().await;
}

#[tokio::test]
async fn test_malformed_frames_are_answered() {
    let (_gateway, addr) = start_gateway().await;
    let mut client = TestClient::connect(addr).await;

    client.send_text("this is not json".to_string()).await;
    match client.recv_outbound().await {
        Outbound::Ack { id, response } => {
            assert_eq!(id, None);
            assert_eq!(response.action, "invalid");
            assert_eq!(response.error_kind(), Some("Malformed"));
        }
        other => panic!("Expected ack, got {:?}", other),
    }

    let response = client
        .request("peer-registration", json!({"videos": ["v1"]}))
        .await;
    assert_eq!(response.error_kind(), Some("Malformed"));

    // Connection stays usable after failures
    assert!(client.register(&["v1"]).await.success);

    client.close().await;
}

#[tokio::test]
async fn test_disconnect_removes_record_and_membership() {
    let (gateway, addr) = start_gateway().await;
    let mut client = TestClient::connect(addr).await;
    client.register(&["v1"]).await;
    let key = client.session_key.clone();

    client.close().await;

    let store = gateway.service().store().clone();
    let removed = eventually(|| {
        let store = store.clone();
        let key = key.clone();
        async move { matches!(store.get(&key).await, Err(PresenceError::NotFound(_))) }
    })
    .await;
    assert!(removed, "record should be deleted after disconnect");
    assert!(gateway.channels().members("v1").is_empty());
    let gateway = &gateway;
    assert!(eventually(|| async move { gateway.connection_count() == 0 }).await);
}

#[tokio::test]
async fn test_broadcast_reaches_channel_members() {
    let (gateway, addr) = start_gateway().await;
    let mut watcher = TestClient::connect(addr).await;
    let mut other = TestClient::connect(addr).await;
    watcher.register(&["v1"]).await;
    other.register(&["v2"]).await;

    let sent = gateway.broadcast("v1", json!({"viewer": "x"}), None);

    assert_eq!(sent, 1);
    match watcher.recv_outbound().await {
        Outbound::Broadcast { channel, data } => {
            assert_eq!(channel, "distributor:v1");
            assert_eq!(data["viewer"], "x");
        }
        other => panic!("Expected broadcast, got {:?}", other),
    }

    watcher.close().await;
    other.close().await;
}
