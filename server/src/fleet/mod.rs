pub mod adapter;
pub mod behaviour;
pub mod config;
pub mod directory;
pub mod envelope;
pub mod identity;
pub mod swarm;

// Re-export key types for convenient access
pub use adapter::FleetAdapter;
pub use config::FleetConfig;
pub use directory::FleetDirectory;
pub use envelope::FleetEnvelope;
pub use swarm::{FleetCommand, FleetEvent};

/// Topic namespace prefix for all fleet gossip.
pub const TOPIC_PREFIX: &str = "momentum";

/// Gossip topic carrying a room's events.
pub fn room_topic(room: &str) -> String {
    format!("{}/{}", TOPIC_PREFIX, room)
}

/// Reverse of `room_topic`: the room key of an inbound topic, or None for
/// gossip outside our namespace.
pub fn room_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TOPIC_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
}
