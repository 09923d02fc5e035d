//! Fire-and-forget handle onto the fleet pub/sub fabric.

use serde_json::Value;
use tokio::sync::mpsc;

use super::{room_topic, FleetCommand, FleetEnvelope};
use crate::rooms;

/// Cheap-to-clone handle used by the router and the connection actors.
///
/// Publishes cannot confirm remote delivery — gossip is fire-and-forget —
/// and transport failures are logged, never surfaced: the offline queue is
/// the designed degradation path. With the fleet disabled (single-process
/// deployment) the command channel is absent and every operation is a no-op.
#[derive(Clone)]
pub struct FleetAdapter {
    cmd_tx: Option<mpsc::UnboundedSender<FleetCommand>>,
}

impl FleetAdapter {
    pub fn new(cmd_tx: mpsc::UnboundedSender<FleetCommand>) -> Self {
        Self { cmd_tx: Some(cmd_tx) }
    }

    /// Single-process mode: publish and subscribe are no-ops.
    pub fn disabled() -> Self {
        Self { cmd_tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.cmd_tx.is_some()
    }

    /// Broadcast an event to every process subscribed to a room. Each
    /// receiving process delivers only to its own local connections, so the
    /// adapter layer itself can never double-deliver to a handle.
    pub fn publish_to_room(&self, room: &str, event: &str, payload: &Value) {
        let Some(cmd_tx) = &self.cmd_tx else {
            return;
        };

        let envelope = FleetEnvelope {
            room: room.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
        };
        let data = match envelope.encode() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(room, event, error = %e, "fleet envelope encode failed");
                return;
            }
        };

        if cmd_tx
            .send(FleetCommand::Publish {
                topic: room_topic(room),
                data,
            })
            .is_err()
        {
            tracing::warn!(room, event, "fleet loop gone; treating target as unreachable via fleet");
        }
    }

    /// User-targeted fan-out: publish to the user's personal room. Processes
    /// holding a connection for the user are subscribed to it.
    pub fn publish_to_user(&self, user_id: &str, event: &str, payload: &Value) {
        self.publish_to_room(&rooms::user_room(user_id), event, payload);
    }

    pub fn subscribe_room(&self, room: &str) {
        let Some(cmd_tx) = &self.cmd_tx else {
            return;
        };
        let _ = cmd_tx.send(FleetCommand::Subscribe(room_topic(room)));
    }

    pub fn unsubscribe_room(&self, room: &str) {
        let Some(cmd_tx) = &self.cmd_tx else {
            return;
        };
        let _ = cmd_tx.send(FleetCommand::Unsubscribe(room_topic(room)));
    }
}
