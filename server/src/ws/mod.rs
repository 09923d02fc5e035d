pub mod actor;
pub mod handler;
pub mod protocol;
pub mod rate_limit;
pub mod registry;

use tokio::sync::mpsc;

/// Type alias for the sender half of a connection's outbound channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Opaque per-connection identity, assigned when the upgrade is accepted.
pub type ConnectionId = uuid::Uuid;
