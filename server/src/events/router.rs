//! Outbound delivery orchestration and inbound event dispatch.
//!
//! One outbound pass per emission: local registry, then fleet fan-out, then
//! the durable queue. No retries beyond that pass. The return value of
//! `emit` reflects local delivery certainty only — gossip cannot confirm
//! remote delivery, and the queue is best-effort.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::fleet::FleetAdapter;
use crate::queue::OfflineQueue;
use crate::ws::protocol::Envelope;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::ConnectionId;

/// A parsed, rate-limited, identity-attributed inbound event, handed off to
/// the business handler registered for its name. The router's job ends here.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub event: String,
    pub payload: Value,
}

/// Boxed future returned by business handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type EventHandler = Arc<dyn Fn(InboundEvent) -> HandlerFuture + Send + Sync>;

/// Per-emission tuning for `emit_with_options`.
#[derive(Debug, Clone, Copy)]
pub struct EmitOptions {
    /// Archive to the offline queue when no local connection exists.
    pub queue_if_offline: bool,
    /// TTL for the queued copy; None uses the configured default.
    pub ttl_seconds: Option<i64>,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            queue_if_offline: true,
            ttl_seconds: None,
        }
    }
}

/// The delivery façade. Holds injected references to the registry, fleet
/// adapter, and offline queue — one instance per process, constructed in
/// main (or a test harness), never an ambient global.
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    fleet: FleetAdapter,
    queue: Arc<OfflineQueue>,
    handlers: DashMap<String, EventHandler>,
    default_ttl_seconds: i64,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        fleet: FleetAdapter,
        queue: Arc<OfflineQueue>,
        default_ttl_seconds: i64,
    ) -> Self {
        Self {
            registry,
            fleet,
            queue,
            handlers: DashMap::new(),
            default_ttl_seconds,
        }
    }

    /// Register the business handler for an event name. Payload shape
    /// validation belongs to the handler, not the router. Last registration
    /// wins.
    pub fn register_handler<F>(&self, event: &str, handler: F)
    where
        F: Fn(InboundEvent) -> HandlerFuture + Send + Sync + 'static,
    {
        self.handlers.insert(event.to_string(), Arc::new(handler));
    }

    /// Hand an inbound event to its registered handler. Returns false when
    /// no handler exists for the event name.
    pub async fn dispatch_inbound(&self, event: InboundEvent) -> bool {
        let handler = match self.handlers.get(&event.event) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        handler(event).await;
        true
    }

    /// Deliver an event to one user. Local connections first; fleet fan-out
    /// and the durable queue as fallbacks when there are none. Returns true
    /// only when at least one local connection received the event — false
    /// means "best effort underway or exhausted", not failure.
    pub async fn emit(&self, user_id: &str, event: &str, payload: &Value) -> bool {
        self.emit_with_options(user_id, event, payload, EmitOptions::default())
            .await
    }

    pub async fn emit_with_options(
        &self,
        user_id: &str,
        event: &str,
        payload: &Value,
        options: EmitOptions,
    ) -> bool {
        let envelope = Envelope::new(event, payload.clone());
        let handles = self.registry.local_connections(user_id);

        if !handles.is_empty() {
            let msg = match envelope.to_message() {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(user_id, event, error = %e, "emit envelope encode failed");
                    return false;
                }
            };
            for handle in &handles {
                if !handle.send(msg.clone()) {
                    tracing::debug!(
                        user_id,
                        connection_id = %handle.id,
                        "send to closing connection dropped"
                    );
                }
            }
            tracing::debug!(user_id, event, connections = handles.len(), "delivered locally");
            return true;
        }

        // Attempted, never confirmed: gossip is fire-and-forget.
        self.fleet.publish_to_user(user_id, event, payload);

        // The queue is the correctness backstop when fan-out silently finds
        // no live connection anywhere. Deliberately redundant with the fleet
        // attempt; consumers tolerate at-least-once.
        if options.queue_if_offline {
            let ttl = options.ttl_seconds.unwrap_or(self.default_ttl_seconds);
            match self.queue.enqueue(user_id, event, payload, ttl).await {
                Some(message_id) => {
                    tracing::debug!(user_id, event, message_id = %message_id, "queued for offline delivery");
                }
                None => {
                    tracing::warn!(user_id, event, "offline queue rejected message; fleet attempt only");
                }
            }
        }

        false
    }

    /// Broadcast to every local member of a room and fan the same event out
    /// to the rest of the fleet. Room broadcasts never touch the queue:
    /// catch-up semantics for disconnected room members are out of scope.
    pub fn emit_to_room(&self, room: &str, event: &str, payload: &Value) {
        let envelope = Envelope::new(event, payload.clone());
        self.deliver_local_room(room, &envelope);
        self.fleet.publish_to_room(room, event, payload);
    }

    /// Deliver a fleet-received event to local subscribers only. Dedup is
    /// structural: this process acts solely on its own connection handles.
    pub fn deliver_from_fleet(&self, room: &str, event: &str, payload: Value) {
        let envelope = Envelope::new(event, payload);
        self.deliver_local_room(room, &envelope);
    }

    fn deliver_local_room(&self, room: &str, envelope: &Envelope) {
        let members = self.registry.room_members(room);
        if members.is_empty() {
            return;
        }
        let msg = match envelope.to_message() {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(room, error = %e, "room envelope encode failed");
                return;
            }
        };
        for handle in &members {
            let _ = handle.send(msg.clone());
        }
        tracing::debug!(
            room,
            event = %envelope.event,
            connections = members.len(),
            "room delivery"
        );
    }
}
