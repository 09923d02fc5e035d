//! Integration tests for the event router: local delivery, room broadcast,
//! offline-queue fallback, reconnect replay, and inbound dispatch.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use momentum_realtime::events::{EventRouter, InboundEvent};
use momentum_realtime::fleet::{FleetAdapter, FleetDirectory};
use momentum_realtime::presence::PresenceTracker;
use momentum_realtime::queue::OfflineQueue;
use momentum_realtime::state::AppState;
use momentum_realtime::ws::rate_limit::{RateLimitConfig, RateLimiter};
use momentum_realtime::ws::registry::ConnectionRegistry;
use momentum_realtime::{auth, db, routes};

type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
>;
type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    Message,
>;

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    _data_dir: tempfile::TempDir,
}

async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let registry = Arc::new(ConnectionRegistry::new());
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
    let queue = Arc::new(OfflineQueue::new(db.clone()));
    let fleet = FleetAdapter::disabled();
    let router = Arc::new(EventRouter::new(
        registry.clone(),
        fleet.clone(),
        queue.clone(),
        3600,
    ));

    let state = AppState {
        db,
        jwt_secret,
        registry,
        limiter,
        queue,
        fleet,
        router,
        presence: Arc::new(PresenceTracker::new()),
        fleet_directory: Arc::new(FleetDirectory::new()),
        fleet_peer_id: None,
    };

    let app = routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        state,
        _data_dir: tmp_dir,
    }
}

/// Connect an authenticated WebSocket for a user.
async fn connect_user(server: &TestServer, user_id: &str) -> (WsWrite, WsRead) {
    let token = auth::jwt::issue_access_token(&server.state.jwt_secret, user_id).unwrap();
    let ws_url = format!("ws://{}/ws?token={}", server.addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect");
    ws_stream.split()
}

/// Next decoded envelope within the timeout, skipping presence updates.
async fn next_event(read: &mut WsRead, wait_ms: u64) -> Option<serde_json::Value> {
    loop {
        match tokio::time::timeout(Duration::from_millis(wait_ms), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let envelope: serde_json::Value = serde_json::from_str(text.as_str()).ok()?;
                if envelope["event"] == "presence:update" {
                    continue;
                }
                return Some(envelope);
            }
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// Seed a challenge and its participants into the membership tables.
fn seed_challenge(state: &AppState, challenge_id: &str, participants: &[&str]) {
    let conn = state.db.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO challenges (id, title, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![challenge_id, "Test challenge", now],
    )
    .unwrap();
    for user in participants {
        conn.execute(
            "INSERT INTO challenge_participants (challenge_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![challenge_id, user, now],
        )
        .unwrap();
    }
}

async fn join_room(write: &mut WsWrite, read: &mut WsRead, room: &str) {
    write
        .send(Message::Text(
            json!({ "event": "room:join", "payload": { "room": room } })
                .to_string()
                .into(),
        ))
        .await
        .expect("Failed to send join");

    let ack = next_event(read, 1000).await.expect("Expected join ack");
    assert_eq!(ack["event"], "room:joined", "join refused: {}", ack);
    assert_eq!(ack["payload"]["room"], room);
}

// Scenario: connection authenticates as "alice", joins "challenge:42";
// emit_to_room("challenge:42", "progress", {value:5}) arrives exactly once.
#[tokio::test]
async fn test_room_broadcast_received_exactly_once() {
    let server = start_test_server().await;
    seed_challenge(&server.state, "42", &["alice"]);

    let (mut write, mut read) = connect_user(&server, "alice").await;
    join_room(&mut write, &mut read, "challenge:42").await;

    server
        .state
        .router
        .emit_to_room("challenge:42", "progress", &json!({ "value": 5 }));

    let event = next_event(&mut read, 1000).await.expect("Expected progress event");
    assert_eq!(event["event"], "progress");
    assert_eq!(event["payload"]["value"], 5);

    // Exactly once: nothing else arrives
    assert!(next_event(&mut read, 300).await.is_none());
}

// Scenario: "bob" has no connections anywhere; emit returns delivered=false
// and the message lands in the offline queue.
#[tokio::test]
async fn test_emit_to_offline_user_queues() {
    let server = start_test_server().await;

    let delivered = server
        .state
        .router
        .emit("bob", "test:ping", &json!({ "msg": "hi" }))
        .await;
    assert!(!delivered, "nobody is connected, delivered must be false");

    let pending = server.state.queue.drain("bob").await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event, "test:ping");
    assert_eq!(pending[0].payload, json!({ "msg": "hi" }));
}

#[tokio::test]
async fn test_emit_to_connected_user_delivers_locally() {
    let server = start_test_server().await;
    let (_write, mut read) = connect_user(&server, "alice").await;

    // Wait for registration before emitting
    tokio::time::sleep(Duration::from_millis(100)).await;

    let delivered = server
        .state
        .router
        .emit("alice", "streak:extended", &json!({ "days": 12 }))
        .await;
    assert!(delivered);

    let event = next_event(&mut read, 1000).await.expect("Expected event");
    assert_eq!(event["event"], "streak:extended");
    assert_eq!(event["payload"]["days"], 12);

    // Locally delivered events are not archived
    assert!(server.state.queue.drain("alice").await.is_empty());
}

#[tokio::test]
async fn test_emit_reaches_every_device() {
    let server = start_test_server().await;
    let (_write_a, mut read_a) = connect_user(&server, "alice").await;
    let (_write_b, mut read_b) = connect_user(&server, "alice").await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.state.registry.local_connections("alice").len(), 2);

    let delivered = server
        .state
        .router
        .emit("alice", "nudge", &json!({ "from": "carol" }))
        .await;
    assert!(delivered);

    let on_a = next_event(&mut read_a, 1000).await.expect("device A event");
    let on_b = next_event(&mut read_b, 1000).await.expect("device B event");
    assert_eq!(on_a["event"], "nudge");
    assert_eq!(on_b["event"], "nudge");
}

#[tokio::test]
async fn test_queued_messages_replayed_on_reconnect_before_other_traffic() {
    let server = start_test_server().await;

    // bob is offline: two emissions get archived
    assert!(!server.state.router.emit("bob", "test:ping", &json!({ "msg": "hi" })).await);
    assert!(!server.state.router.emit("bob", "test:ping2", &json!({ "msg": "again" })).await);
    assert_eq!(server.state.queue.drain("bob").await.len(), 2);

    // Reconnect: the backlog is flushed oldest-first before anything else
    let (_write, mut read) = connect_user(&server, "bob").await;

    let first = next_event(&mut read, 1000).await.expect("first replayed event");
    assert_eq!(first["event"], "test:ping");
    assert_eq!(first["payload"]["msg"], "hi");

    let second = next_event(&mut read, 1000).await.expect("second replayed event");
    assert_eq!(second["event"], "test:ping2");

    // The flush confirmed delivery, so the queue is now empty
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.state.queue.drain("bob").await.is_empty());
}

#[tokio::test]
async fn test_join_refused_for_non_member() {
    let server = start_test_server().await;
    seed_challenge(&server.state, "42", &["alice"]);

    let (mut write, mut read) = connect_user(&server, "mallory").await;

    write
        .send(Message::Text(
            json!({ "event": "room:join", "payload": { "room": "challenge:42" } })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let response = next_event(&mut read, 1000).await.expect("Expected error envelope");
    assert_eq!(response["event"], "error");
    assert_eq!(response["payload"]["code"], 403);

    // No delivery to the refused user on that room
    server
        .state
        .router
        .emit_to_room("challenge:42", "progress", &json!({ "value": 1 }));
    assert!(next_event(&mut read, 300).await.is_none());
}

#[tokio::test]
async fn test_join_unknown_room_key_rejected() {
    let server = start_test_server().await;
    let (mut write, mut read) = connect_user(&server, "alice").await;

    write
        .send(Message::Text(
            json!({ "event": "room:join", "payload": { "room": "bogus:1" } })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let response = next_event(&mut read, 1000).await.expect("Expected error envelope");
    assert_eq!(response["event"], "error");
    assert_eq!(response["payload"]["code"], 400);
}

#[tokio::test]
async fn test_inbound_event_dispatched_to_registered_handler() {
    let server = start_test_server().await;

    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel::<InboundEvent>();
    server.state.router.register_handler("habit:checkin", move |event| {
        let seen_tx = seen_tx.clone();
        Box::pin(async move {
            let _ = seen_tx.send(event);
        })
    });

    let (mut write, mut _read) = connect_user(&server, "alice").await;
    write
        .send(Message::Text(
            json!({ "event": "habit:checkin", "payload": { "habit_id": "7" } })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .expect("handler should run")
        .expect("handler event");
    assert_eq!(event.user_id, "alice");
    assert_eq!(event.event, "habit:checkin");
    assert_eq!(event.payload, json!({ "habit_id": "7" }));
}

#[tokio::test]
async fn test_unhandled_event_gets_error_envelope() {
    let server = start_test_server().await;
    let (mut write, mut read) = connect_user(&server, "alice").await;

    write
        .send(Message::Text(
            json!({ "event": "no:such:event", "payload": {} })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let response = next_event(&mut read, 1000).await.expect("Expected error envelope");
    assert_eq!(response["event"], "error");
    assert_eq!(response["payload"]["code"], 404);
}

// Scenario: limiter at window=1000ms, max=10; 15 events sent back-to-back
// result in exactly 10 dispatched and 5 dropped.
#[tokio::test]
async fn test_rate_limited_events_dropped_silently() {
    let server = start_test_server().await;

    let counter = Arc::new(AtomicUsize::new(0));
    let handler_counter = counter.clone();
    server.state.router.register_handler("spam", move |_event| {
        let handler_counter = handler_counter.clone();
        Box::pin(async move {
            handler_counter.fetch_add(1, Ordering::SeqCst);
        })
    });

    let (mut write, mut _read) = connect_user(&server, "alice").await;

    for i in 0..15 {
        write
            .send(Message::Text(
                json!({ "event": "spam", "payload": { "n": i } })
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        counter.load(Ordering::SeqCst),
        10,
        "exactly max_events must reach the handler, the rest drop"
    );
}

#[tokio::test]
async fn test_emit_api_endpoint() {
    let server = start_test_server().await;
    let token = auth::jwt::issue_access_token(&server.state.jwt_secret, "rest-layer").unwrap();
    let client = reqwest::Client::new();

    // bob is offline: delivered=false, message archived
    let resp = client
        .post(format!("http://{}/api/events/emit", server.addr))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({
            "user_id": "bob",
            "event": "challenge:invite",
            "payload": { "challenge_id": "42" },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["delivered"], false);
    assert_eq!(server.state.queue.drain("bob").await.len(), 1);

    // Without a token the endpoint refuses
    let resp = client
        .post(format!("http://{}/api/events/emit", server.addr))
        .json(&json!({ "user_id": "bob", "event": "x", "payload": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_queue_stats_endpoint() {
    let server = start_test_server().await;
    let token = auth::jwt::issue_access_token(&server.state.jwt_secret, "ops").unwrap();

    server.state.queue.enqueue("bob", "a", &json!({}), 60).await.unwrap();
    server.state.queue.enqueue("bob", "b", &json!({}), 60).await.unwrap();
    server.state.queue.enqueue("carol", "c", &json!({}), 60).await.unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{}/api/queue/stats", server.addr))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["total_queued"], 3);
    assert_eq!(body["users_with_messages"], 2);
}
