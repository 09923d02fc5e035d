//! Offline queue semantics: round-trip fidelity, read-time expiry, ordering,
//! idempotent clear, partial removal, and stats.

use serde_json::json;
use std::time::Duration;

use momentum_realtime::db::{self, DbPool};
use momentum_realtime::queue::OfflineQueue;

fn open_queue() -> (OfflineQueue, DbPool, tempfile::TempDir) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();
    let db = db::init_db(&data_dir).expect("Failed to init DB");
    (OfflineQueue::new(db.clone()), db, tmp_dir)
}

#[tokio::test]
async fn test_enqueue_drain_round_trip() {
    let (queue, _db, _tmp) = open_queue();

    let payload = json!({ "msg": "hi", "count": 3, "nested": { "ok": true } });
    let id = queue.enqueue("bob", "test:ping", &payload, 60).await;
    assert!(id.is_some());

    let pending = queue.drain("bob").await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].user_id, "bob");
    assert_eq!(pending[0].event, "test:ping");
    assert_eq!(pending[0].payload, payload, "payload must survive unchanged");
    assert_eq!(pending[0].id, id.unwrap());
}

#[tokio::test]
async fn test_drain_is_read_only_and_restartable() {
    let (queue, _db, _tmp) = open_queue();
    queue.enqueue("bob", "test:ping", &json!({}), 60).await.unwrap();

    assert_eq!(queue.drain("bob").await.len(), 1);
    // A failed delivery attempt may call drain again; nothing was mutated
    assert_eq!(queue.drain("bob").await.len(), 1);
}

#[tokio::test]
async fn test_drain_returns_oldest_first() {
    let (queue, _db, _tmp) = open_queue();
    queue.enqueue("bob", "first", &json!({}), 60).await.unwrap();
    queue.enqueue("bob", "second", &json!({}), 60).await.unwrap();
    queue.enqueue("bob", "third", &json!({}), 60).await.unwrap();

    let events: Vec<String> = queue
        .drain("bob")
        .await
        .into_iter()
        .map(|m| m.event)
        .collect();
    assert_eq!(events, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_drain_scoped_per_user() {
    let (queue, _db, _tmp) = open_queue();
    queue.enqueue("bob", "for-bob", &json!({}), 60).await.unwrap();
    queue.enqueue("carol", "for-carol", &json!({}), 60).await.unwrap();

    let pending = queue.drain("bob").await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event, "for-bob");
}

#[tokio::test]
async fn test_enqueue_with_expired_ttl_rejected() {
    let (queue, _db, _tmp) = open_queue();

    assert!(queue.enqueue("bob", "late", &json!({}), 0).await.is_none());
    assert!(queue.enqueue("bob", "later", &json!({}), -5).await.is_none());
    assert!(queue.drain("bob").await.is_empty());
}

// A message enqueued with ttl=1s is absent from drain shortly afterwards,
// with no sweep involved — expiry is checked at read time.
#[tokio::test]
async fn test_expired_message_absent_from_drain() {
    let (queue, _db, _tmp) = open_queue();

    queue.enqueue("bob", "ephemeral", &json!({ "x": 1 }), 1).await.unwrap();
    queue.enqueue("bob", "durable", &json!({ "x": 2 }), 600).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let pending = queue.drain("bob").await;
    assert_eq!(pending.len(), 1, "expired message must be treated as absent");
    assert_eq!(pending[0].event, "durable");
}

#[tokio::test]
async fn test_clear_is_idempotent() {
    let (queue, _db, _tmp) = open_queue();
    queue.enqueue("bob", "a", &json!({}), 60).await.unwrap();
    queue.enqueue("bob", "b", &json!({}), 60).await.unwrap();

    assert_eq!(queue.clear("bob").await, 2);
    assert!(queue.drain("bob").await.is_empty());

    // Second clear is a safe no-op
    assert_eq!(queue.clear("bob").await, 0);
}

#[tokio::test]
async fn test_remove_message_deletes_only_that_message() {
    let (queue, _db, _tmp) = open_queue();
    let first = queue.enqueue("bob", "a", &json!({}), 60).await.unwrap();
    queue.enqueue("bob", "b", &json!({}), 60).await.unwrap();

    queue.remove_message("bob", &first).await;

    let pending = queue.drain("bob").await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event, "b");
}

#[tokio::test]
async fn test_stats_counts_non_expired_only() {
    let (queue, _db, _tmp) = open_queue();
    queue.enqueue("bob", "a", &json!({}), 1).await.unwrap();
    queue.enqueue("bob", "b", &json!({}), 600).await.unwrap();
    queue.enqueue("carol", "c", &json!({}), 600).await.unwrap();

    let stats = queue.stats().await;
    assert_eq!(stats.total_queued, 3);
    assert_eq!(stats.users_with_messages, 2);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let stats = queue.stats().await;
    assert_eq!(stats.total_queued, 2, "expired rows drop out of stats");
    assert_eq!(stats.users_with_messages, 2);
}
