//! Room keys and membership authorization.
//!
//! Rooms are logical channel identities, not stored entities — membership is
//! re-derived from the relational tables on every join, and the core never
//! writes through this interface.

use crate::db::DbPool;

/// Parsed room identity. The wire form is the colon-joined key, e.g.
/// "challenge:42", "team:7", "habit:9", "user:01J...", or the bare
/// "presence" feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomKey {
    Challenge(String),
    Team(String),
    Habit(String),
    User(String),
    /// Global presence feed, open to any authenticated user.
    Presence,
}

impl RoomKey {
    /// Parse a wire room key. Unknown prefixes and empty ids are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "presence" {
            return Some(Self::Presence);
        }
        let (kind, id) = raw.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        match kind {
            "challenge" => Some(Self::Challenge(id.to_string())),
            "team" => Some(Self::Team(id.to_string())),
            "habit" => Some(Self::Habit(id.to_string())),
            "user" => Some(Self::User(id.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Challenge(id) => write!(f, "challenge:{}", id),
            Self::Team(id) => write!(f, "team:{}", id),
            Self::Habit(id) => write!(f, "habit:{}", id),
            Self::User(id) => write!(f, "user:{}", id),
            Self::Presence => write!(f, "presence"),
        }
    }
}

/// The user's personal room, auto-joined at registration so user-targeted
/// fleet fan-out reaches every process holding one of their connections.
pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Read-only membership check against the relational store. A store failure
/// refuses the join (logged); authorization never errs on the open side.
pub async fn is_member(db: &DbPool, user_id: &str, room: &RoomKey) -> bool {
    match room {
        RoomKey::Presence => true,
        RoomKey::User(id) => id == user_id,
        RoomKey::Challenge(id) => {
            membership_row(
                db,
                "SELECT 1 FROM challenge_participants WHERE challenge_id = ?1 AND user_id = ?2",
                id,
                user_id,
            )
            .await
        }
        RoomKey::Team(id) => {
            membership_row(
                db,
                "SELECT 1 FROM team_members WHERE team_id = ?1 AND user_id = ?2",
                id,
                user_id,
            )
            .await
        }
        RoomKey::Habit(id) => {
            // Owner counts as a member even without a habit_members row.
            membership_row(
                db,
                "SELECT 1 FROM habit_members WHERE habit_id = ?1 AND user_id = ?2
                 UNION ALL
                 SELECT 1 FROM habits WHERE id = ?1 AND owner_id = ?2",
                id,
                user_id,
            )
            .await
        }
    }
}

async fn membership_row(db: &DbPool, sql: &'static str, entity_id: &str, user_id: &str) -> bool {
    let db = db.clone();
    let entity_id = entity_id.to_string();
    let user_id = user_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = match db.lock() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "DB lock failed during membership check");
                return false;
            }
        };
        match conn.query_row(sql, rusqlite::params![entity_id, user_id], |_| Ok(())) {
            Ok(()) => true,
            Err(rusqlite::Error::QueryReturnedNoRows) => false,
            Err(e) => {
                tracing::warn!(error = %e, "membership query failed, refusing join");
                false
            }
        }
    })
    .await
    .unwrap_or(false)
}
