//! Process-local presence tracking and broadcast.
//!
//! The online map answers for this process's own connections; updates fan
//! out on the `presence` room locally and across the fleet so clients
//! anywhere observe them. A newly connected client gets the current local
//! snapshot pushed directly.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;

use crate::state::AppState;
use crate::ws::protocol::{self, Envelope};
use crate::ws::registry::ConnectionHandle;

/// Room every presence update is emitted to. Open to any authenticated user.
pub const PRESENCE_ROOM: &str = "presence";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Info tracked per online user.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceInfo {
    pub user_id: String,
    pub status: PresenceStatus,
    pub since: DateTime<Utc>,
}

/// In-memory online map, keyed by user id. Offline users are absent.
pub struct PresenceTracker {
    online: DashMap<String, PresenceInfo>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            online: DashMap::new(),
        }
    }

    fn set_online(&self, user_id: &str) -> PresenceInfo {
        let info = PresenceInfo {
            user_id: user_id.to_string(),
            status: PresenceStatus::Online,
            since: Utc::now(),
        };
        self.online.insert(user_id.to_string(), info.clone());
        info
    }

    fn set_offline(&self, user_id: &str) {
        self.online.remove(user_id);
    }

    /// Currently online users on this process.
    pub fn snapshot(&self) -> Vec<PresenceInfo> {
        self.online.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Flip a user online and broadcast. Called when their first local
/// connection registers.
pub fn mark_online(state: &AppState, user_id: &str) {
    let info = state.presence.set_online(user_id);
    broadcast_update(state, &info);
}

/// Flip a user offline and broadcast. Called when their last local
/// connection unregisters.
pub fn mark_offline(state: &AppState, user_id: &str) {
    state.presence.set_offline(user_id);
    broadcast_update(
        state,
        &PresenceInfo {
            user_id: user_id.to_string(),
            status: PresenceStatus::Offline,
            since: Utc::now(),
        },
    );
}

fn broadcast_update(state: &AppState, info: &PresenceInfo) {
    state.router.emit_to_room(
        PRESENCE_ROOM,
        "presence:update",
        &json!({
            "user_id": info.user_id,
            "status": info.status,
            "since": info.since,
        }),
    );
}

/// Push the current online snapshot to one freshly connected client.
pub fn send_snapshot(state: &AppState, handle: &ConnectionHandle) {
    for info in state.presence.snapshot() {
        protocol::send_to(
            handle,
            &Envelope::new(
                "presence:update",
                json!({
                    "user_id": info.user_id,
                    "status": info.status,
                    "since": info.since,
                }),
            ),
        );
    }
}
