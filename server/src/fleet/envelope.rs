//! JSON envelope carried on fleet gossip topics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors that can occur decoding an inbound gossip payload.
#[derive(Debug)]
pub enum EnvelopeError {
    /// Payload was not a valid JSON envelope
    Decode(String),
    /// Envelope named a different room than the topic it arrived on
    TopicMismatch { topic_room: String, room: String },
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "Decode error: {}", e),
            Self::TopicMismatch { topic_room, room } => {
                write!(f, "Envelope room {} does not match topic room {}", room, topic_room)
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// One room event in transit between fleet processes. Each receiving
/// process delivers only to its own locally registered connections, so the
/// envelope carries no addressing beyond the room itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEnvelope {
    pub room: String,
    pub event: String,
    pub payload: Value,
}

impl FleetEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode an inbound gossip payload, checking it against the room the
    /// topic is subscribed for — a mismatched envelope is dropped rather
    /// than delivered to the wrong subscribers.
    pub fn decode(topic_room: &str, data: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: FleetEnvelope =
            serde_json::from_slice(data).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        if envelope.room != topic_room {
            return Err(EnvelopeError::TopicMismatch {
                topic_room: topic_room.to_string(),
                room: envelope.room,
            });
        }
        Ok(envelope)
    }
}
