//! Durable offline delivery queue.
//!
//! Events emitted to a user with no reachable connection are archived here
//! and replayed on the next reconnect, before any other room traffic. Rows
//! carry an absolute expiry checked at read time; the background sweep is
//! storage hygiene only, correctness never depends on it.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::db::DbPool;

/// A message awaiting delivery to a user.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedMessage {
    pub id: String,
    pub user_id: String,
    pub event: String,
    pub payload: Value,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds; rows at or past this instant are treated as absent.
    pub expires_at: i64,
}

/// Queue counters for the monitoring surface.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub total_queued: u64,
    pub users_with_messages: u64,
}

/// SQLite-backed per-user queue. Every operation is best-effort: a failing
/// store logs and degrades (enqueue returns None, drain returns nothing)
/// instead of failing the caller's emission.
pub struct OfflineQueue {
    db: DbPool,
}

impl OfflineQueue {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Archive one event for an offline user. Returns the message id, or
    /// None when the ttl is non-positive or the store is unavailable.
    pub async fn enqueue(
        &self,
        user_id: &str,
        event: &str,
        payload: &Value,
        ttl_seconds: i64,
    ) -> Option<String> {
        if ttl_seconds <= 0 {
            tracing::debug!(user_id, event, ttl_seconds, "rejecting enqueue with expired ttl");
            return None;
        }

        let id = uuid::Uuid::now_v7().to_string();
        let now = Utc::now().timestamp_millis();
        let expires_at = now + ttl_seconds * 1000;
        let payload_text = payload.to_string();

        let db = self.db.clone();
        let row_id = id.clone();
        let user = user_id.to_string();
        let event_name = event.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| format!("DB lock failed: {}", e))?;
            conn.execute(
                "INSERT INTO queued_messages (id, user_id, event, payload, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![row_id, user, event_name, payload_text, now, expires_at],
            )
            .map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        })
        .await;

        match result {
            Ok(Ok(())) => Some(id),
            Ok(Err(e)) => {
                tracing::warn!(user_id, event, error = %e, "offline enqueue failed");
                None
            }
            Err(e) => {
                tracing::warn!(user_id, event, error = %e, "offline enqueue task failed");
                None
            }
        }
    }

    /// All pending, non-expired messages for a user, oldest first. Read-only
    /// and restartable: call again if flushing to the client failed.
    pub async fn drain(&self, user_id: &str) -> Vec<QueuedMessage> {
        let now = Utc::now().timestamp_millis();
        let db = self.db.clone();
        let user = user_id.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| format!("DB lock failed: {}", e))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, event, payload, created_at, expires_at
                     FROM queued_messages
                     WHERE user_id = ?1 AND expires_at > ?2
                     ORDER BY created_at ASC, id ASC",
                )
                .map_err(|e| e.to_string())?;

            let messages: Vec<QueuedMessage> = stmt
                .query_map(rusqlite::params![user, now], |row| {
                    let payload_text: String = row.get(3)?;
                    Ok(QueuedMessage {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        event: row.get(2)?,
                        payload: serde_json::from_str(&payload_text).unwrap_or(Value::Null),
                        created_at: row.get(4)?,
                        expires_at: row.get(5)?,
                    })
                })
                .map_err(|e| e.to_string())?
                .filter_map(|r| r.ok())
                .collect();

            Ok::<_, String>(messages)
        })
        .await;

        match result {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                tracing::warn!(user_id, error = %e, "offline drain failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "offline drain task failed");
                Vec::new()
            }
        }
    }

    /// Delete every queued message for a user. Idempotent — clearing an
    /// empty queue is a no-op. Called once the drained batch is confirmed
    /// flushed to the client.
    pub async fn clear(&self, user_id: &str) -> usize {
        let db = self.db.clone();
        let user = user_id.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| format!("DB lock failed: {}", e))?;
            conn.execute(
                "DELETE FROM queued_messages WHERE user_id = ?1",
                rusqlite::params![user],
            )
            .map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                tracing::warn!(user_id, error = %e, "offline queue clear failed");
                0
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "offline queue clear task failed");
                0
            }
        }
    }

    /// Delete a single message, used after partial delivery of a drained batch.
    pub async fn remove_message(&self, user_id: &str, message_id: &str) {
        let db = self.db.clone();
        let user = user_id.to_string();
        let id = message_id.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| format!("DB lock failed: {}", e))?;
            conn.execute(
                "DELETE FROM queued_messages WHERE user_id = ?1 AND id = ?2",
                rusqlite::params![user, id],
            )
            .map_err(|e| e.to_string())
        })
        .await;

        if let Ok(Err(e)) = result {
            tracing::warn!(user_id, message_id, error = %e, "queued message removal failed");
        }
    }

    /// Counters over non-expired messages, for dashboards.
    pub async fn stats(&self) -> QueueStats {
        let now = Utc::now().timestamp_millis();
        let db = self.db.clone();

        let result = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| format!("DB lock failed: {}", e))?;
            conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT user_id)
                 FROM queued_messages WHERE expires_at > ?1",
                rusqlite::params![now],
                |row| {
                    Ok(QueueStats {
                        total_queued: row.get::<_, i64>(0)? as u64,
                        users_with_messages: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(Ok(stats)) => stats,
            _ => {
                tracing::warn!("offline queue stats query failed");
                QueueStats {
                    total_queued: 0,
                    users_with_messages: 0,
                }
            }
        }
    }
}

/// Spawn the hygiene sweep: periodically delete expired rows so the table
/// does not grow without bound. Drain filters expiry at read time, so this
/// task is never load-bearing for correctness.
pub fn spawn_expiry_sweep(db: DbPool, interval: std::time::Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let db = db.clone();
            let _ = tokio::task::spawn_blocking(move || {
                if let Ok(conn) = db.lock() {
                    let now = Utc::now().timestamp_millis();
                    match conn.execute(
                        "DELETE FROM queued_messages WHERE expires_at <= ?1",
                        rusqlite::params![now],
                    ) {
                        Ok(count) if count > 0 => {
                            tracing::info!(count, "purged expired queued messages");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "queued message sweep failed");
                        }
                    }
                }
            })
            .await;
        }
    });
}
