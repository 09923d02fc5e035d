//! Process-local connection registry.
//!
//! Authoritative for "is this user connected to *this* process" — it only
//! ever reports local connections. Cross-process reachability is the fleet
//! adapter's job, never faked here.

use std::collections::HashSet;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{ConnectionId, ConnectionSender};

/// Handle to one live connection: its id, the user it was bound to at
/// upgrade time (never rebound afterwards), and the sender feeding its
/// writer task. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    pub tx: ConnectionSender,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn new(user_id: &str, tx: ConnectionSender) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            user_id: user_id.to_string(),
            tx,
            connected_at: Utc::now(),
        }
    }

    /// Push a raw message to this connection. A failed send means the writer
    /// task is gone; the disconnect cleanup path removes the handle.
    pub fn send(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// What unregistering a connection changed, so the caller can drive fleet
/// topic unsubscribes and presence transitions.
pub struct UnregisterOutcome {
    /// True if this was the user's last local connection.
    pub user_now_unreachable: bool,
    /// Rooms whose local membership dropped to zero.
    pub emptied_rooms: Vec<String>,
}

/// Tracks all active connections on this process, per user and per room.
/// A user can have multiple concurrent connections (multiple devices).
pub struct ConnectionRegistry {
    /// user_id -> live handles
    users: DashMap<String, Vec<ConnectionHandle>>,
    /// room -> locally subscribed handles, in join order
    rooms: DashMap<String, Vec<ConnectionHandle>>,
    /// connection id -> rooms joined, for synchronous disconnect cleanup
    joined: DashMap<ConnectionId, HashSet<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            rooms: DashMap::new(),
            joined: DashMap::new(),
        }
    }

    /// Register a handle under its bound user. Returns true if the user was
    /// previously unreachable on this process (0 -> 1 transition).
    pub fn register(&self, handle: ConnectionHandle) -> bool {
        let id = handle.id;
        let first = {
            let mut handles = self.users.entry(handle.user_id.clone()).or_default();
            let first = handles.is_empty();
            handles.push(handle);
            first
        };
        self.joined.insert(id, HashSet::new());

        tracing::debug!(connection_id = %id, first_for_user = first, "connection registered");
        first
    }

    /// Remove a connection from the user map and every room it joined.
    /// Cleanup is synchronous — there is no window in which a stale handle
    /// stays reachable.
    pub fn unregister(&self, handle: &ConnectionHandle) -> UnregisterOutcome {
        let mut user_now_unreachable = false;
        if let Some(mut handles) = self.users.get_mut(&handle.user_id) {
            handles.retain(|h| h.id != handle.id);
            user_now_unreachable = handles.is_empty();
        }
        if user_now_unreachable {
            self.users.remove(&handle.user_id);
        }

        let mut emptied_rooms = Vec::new();
        if let Some((_, joined)) = self.joined.remove(&handle.id) {
            for room in joined {
                if self.remove_from_room(&room, handle.id) {
                    emptied_rooms.push(room);
                }
            }
        }

        tracing::debug!(
            user_id = %handle.user_id,
            connection_id = %handle.id,
            "connection unregistered"
        );
        UnregisterOutcome {
            user_now_unreachable,
            emptied_rooms,
        }
    }

    /// All local handles for a user. Empty if the user is not connected here.
    pub fn local_connections(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.users
            .get(user_id)
            .map(|handles| handles.value().clone())
            .unwrap_or_default()
    }

    pub fn is_locally_reachable(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .map(|handles| !handles.is_empty())
            .unwrap_or(false)
    }

    /// Subscribe a connection to a room. Returns true if this made the room
    /// non-empty locally — the caller subscribes the fleet topic on that
    /// transition. Re-joining a room a connection is already in is a no-op.
    pub fn join_room(&self, handle: &ConnectionHandle, room: &str) -> bool {
        let newly_joined = self
            .joined
            .get_mut(&handle.id)
            .map(|mut rooms| rooms.insert(room.to_string()))
            .unwrap_or(false);
        if !newly_joined {
            return false;
        }

        let mut members = self.rooms.entry(room.to_string()).or_default();
        let first = members.is_empty();
        members.push(handle.clone());
        first
    }

    /// Unsubscribe a connection from a room. None if the connection was not
    /// in the room; Some(true) if the room is now empty locally.
    pub fn leave_room(&self, handle: &ConnectionHandle, room: &str) -> Option<bool> {
        let was_member = self
            .joined
            .get_mut(&handle.id)
            .map(|mut rooms| rooms.remove(room))
            .unwrap_or(false);
        if !was_member {
            return None;
        }
        Some(self.remove_from_room(room, handle.id))
    }

    /// Local members of a room, in join order.
    pub fn room_members(&self, room: &str) -> Vec<ConnectionHandle> {
        self.rooms
            .get(room)
            .map(|members| members.value().clone())
            .unwrap_or_default()
    }

    /// Total live connections on this process.
    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }

    fn remove_from_room(&self, room: &str, id: ConnectionId) -> bool {
        let mut emptied = false;
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.retain(|h| h.id != id);
            emptied = members.is_empty();
        }
        if emptied {
            self.rooms.remove(room);
        }
        emptied
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
