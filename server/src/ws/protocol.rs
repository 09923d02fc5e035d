//! Wire protocol: JSON event envelopes and inbound dispatch.
//!
//! Every frame in either direction is `{"event": string, "payload": JSON}`.
//! Built-in events `room:join` / `room:leave` are handled here; everything
//! else goes to the business handler registered on the router.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events::InboundEvent;
use crate::rooms::{self, RoomKey};
use crate::state::AppState;
use crate::ws::registry::ConnectionHandle;

/// The envelope exchanged in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: &str, payload: Value) -> Self {
        Self {
            event: event.to_string(),
            payload,
        }
    }

    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// What the reader loop should do after an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// Close the connection with this code/reason.
    Close(u16, &'static str),
}

/// Close code when the rate-limit disconnect policy fires.
pub const CLOSE_RATE_LIMITED: u16 = 4008;

/// Handle one inbound text frame: rate-limit, decode, dispatch.
pub async fn handle_text_message(
    text: &str,
    handle: &ConnectionHandle,
    state: &AppState,
) -> Disposition {
    // The budget is charged before any work on the frame — malformed spam
    // counts too. Dropped events get no nack (fire-and-forget contract).
    if state.limiter.should_reject(handle.id) {
        tracing::debug!(
            user_id = %handle.user_id,
            connection_id = %handle.id,
            "inbound event dropped by rate limiter"
        );
        if state.limiter.exceeded_violation_limit(handle.id) {
            return Disposition::Close(CLOSE_RATE_LIMITED, "Rate limit exceeded");
        }
        return Disposition::Continue;
    }

    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(user_id = %handle.user_id, error = %e, "undecodable inbound envelope");
            send_error(handle, 400, "Invalid event envelope");
            return Disposition::Continue;
        }
    };
    if envelope.event.is_empty() {
        send_error(handle, 400, "Empty event name");
        return Disposition::Continue;
    }

    match envelope.event.as_str() {
        "room:join" => handle_room_join(handle, state, &envelope.payload).await,
        "room:leave" => handle_room_leave(handle, state, &envelope.payload),
        _ => {
            let dispatched = state
                .router
                .dispatch_inbound(InboundEvent {
                    connection_id: handle.id,
                    user_id: handle.user_id.clone(),
                    event: envelope.event.clone(),
                    payload: envelope.payload,
                })
                .await;
            if !dispatched {
                tracing::debug!(
                    user_id = %handle.user_id,
                    event = %envelope.event,
                    "no handler registered for event"
                );
                send_error(handle, 404, "No handler for event");
            }
        }
    }
    Disposition::Continue
}

async fn handle_room_join(handle: &ConnectionHandle, state: &AppState, payload: &Value) {
    let Some(raw) = room_field(payload) else {
        send_error(handle, 400, "Missing room");
        return;
    };
    let Some(key) = RoomKey::parse(raw) else {
        send_error(handle, 400, "Unknown room key");
        return;
    };

    if !rooms::is_member(&state.db, &handle.user_id, &key).await {
        tracing::debug!(user_id = %handle.user_id, room = raw, "room join refused");
        send_error(handle, 403, "Not a member of this room");
        return;
    }

    let room = key.to_string();
    if state.registry.join_room(handle, &room) {
        state.fleet.subscribe_room(&room);
    }
    send_to(handle, &Envelope::new("room:joined", json!({ "room": room })));
}

fn handle_room_leave(handle: &ConnectionHandle, state: &AppState, payload: &Value) {
    let Some(raw) = room_field(payload) else {
        send_error(handle, 400, "Missing room");
        return;
    };
    let Some(key) = RoomKey::parse(raw) else {
        send_error(handle, 400, "Unknown room key");
        return;
    };
    // The personal room backs user-targeted fleet delivery for as long as
    // the connection lives; leaving it is not allowed.
    if key == RoomKey::User(handle.user_id.clone()) {
        send_error(handle, 400, "Cannot leave personal room");
        return;
    }

    let room = key.to_string();
    match state.registry.leave_room(handle, &room) {
        None => send_error(handle, 400, "Not in this room"),
        Some(emptied) => {
            if emptied {
                state.fleet.unsubscribe_room(&room);
            }
            send_to(handle, &Envelope::new("room:left", json!({ "room": room })));
        }
    }
}

fn room_field(payload: &Value) -> Option<&str> {
    payload.get("room").and_then(Value::as_str)
}

/// Encode and push an envelope to one connection.
pub fn send_to(handle: &ConnectionHandle, envelope: &Envelope) {
    if let Ok(msg) = envelope.to_message() {
        let _ = handle.send(msg);
    }
}

/// Push an error envelope: `{"event":"error","payload":{code,message}}`.
pub fn send_error(handle: &ConnectionHandle, code: u16, message: &str) {
    send_to(
        handle,
        &Envelope::new("error", json!({ "code": code, "message": message })),
    );
}
