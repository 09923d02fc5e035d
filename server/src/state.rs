use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventRouter;
use crate::fleet::{FleetAdapter, FleetDirectory};
use crate::presence::PresenceTracker;
use crate::queue::OfflineQueue;
use crate::ws::rate_limit::RateLimiter;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
///
/// Constructed exactly once per process in main (or a test harness) and
/// handed to every component that needs it — no ambient globals.
#[derive(Clone)]
pub struct AppState {
    /// SQLite handle: membership tables (read-only here) plus the offline queue
    pub db: DbPool,
    /// JWT verification secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live WebSocket connections on this process
    pub registry: Arc<ConnectionRegistry>,
    /// Per-connection inbound event budget
    pub limiter: Arc<RateLimiter>,
    /// Durable offline delivery queue
    pub queue: Arc<OfflineQueue>,
    /// Handle onto the fleet pub/sub fabric (no-op when disabled)
    pub fleet: FleetAdapter,
    /// Delivery façade over registry + fleet + queue
    pub router: Arc<EventRouter>,
    /// Process-local online map
    pub presence: Arc<PresenceTracker>,
    /// Connected fleet peers, for the operational surface
    pub fleet_directory: Arc<FleetDirectory>,
    /// This process's fleet PeerId (None when the fleet is disabled)
    pub fleet_peer_id: Option<String>,
}
