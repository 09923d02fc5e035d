use axum::{
    extract::State,
    http::StatusCode,
    middleware, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::{Claims, JwtSecret};
use crate::events::EmitOptions;
use crate::presence::PresenceInfo;
use crate::queue::QueueStats;
use crate::rooms::RoomKey;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

#[derive(Debug, Deserialize)]
pub struct EmitRequest {
    pub user_id: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    /// TTL for the queued copy; omitted = configured default.
    pub ttl_seconds: Option<i64>,
    /// Set false to skip the durable fallback for fire-and-forget signals.
    pub queue_if_offline: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct EmitResponse {
    pub delivered: bool,
}

/// POST /api/events/emit — the REST layer's entry point into the router.
/// `delivered` reflects local delivery certainty only; false means best
/// effort underway or exhausted, and is the caller's cue to consider a push
/// notification instead.
async fn emit_event(
    State(state): State<AppState>,
    _claims: Claims,
    Json(req): Json<EmitRequest>,
) -> Result<Json<EmitResponse>, StatusCode> {
    if req.user_id.is_empty() || req.event.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let options = EmitOptions {
        queue_if_offline: req.queue_if_offline.unwrap_or(true),
        ttl_seconds: req.ttl_seconds,
    };
    let delivered = state
        .router
        .emit_with_options(&req.user_id, &req.event, &req.payload, options)
        .await;

    Ok(Json(EmitResponse { delivered }))
}

#[derive(Debug, Deserialize)]
pub struct EmitRoomRequest {
    pub room: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// POST /api/events/emit-room — room broadcast: every local subscriber plus
/// fleet fan-out. No offline-queue fallback for rooms.
async fn emit_room_event(
    State(state): State<AppState>,
    _claims: Claims,
    Json(req): Json<EmitRoomRequest>,
) -> Result<StatusCode, StatusCode> {
    if req.event.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let Some(key) = RoomKey::parse(&req.room) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    state
        .router
        .emit_to_room(&key.to_string(), &req.event, &req.payload);

    Ok(StatusCode::ACCEPTED)
}

/// GET /api/queue/stats — read-only counters for monitoring dashboards.
async fn queue_stats(
    State(state): State<AppState>,
    _claims: Claims,
) -> Json<QueueStats> {
    Json(state.queue.stats().await)
}

/// GET /api/presence — users currently online on this process.
async fn get_presence(
    State(state): State<AppState>,
    _claims: Claims,
) -> Json<Vec<PresenceInfo>> {
    Json(state.presence.snapshot())
}

/// GET /api/fleet/info — public operational endpoint describing this
/// process's position in the fleet.
async fn fleet_info(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "enabled": state.fleet.is_enabled(),
        "peer_id": state.fleet_peer_id,
        "peer_count": state.fleet_directory.peer_count(),
        "peers": state.fleet_directory.snapshot(),
    }))
}

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Emit API guard: 60 requests per minute per IP with a burst allowance.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(1) // 1 token per second = 60 per minute
            .burst_size(30)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Background task to clean up governor state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // Emit API (JWT required; the REST layer authenticates like any client)
    let emit_routes = Router::new()
        .route("/api/events/emit", axum::routing::post(emit_event))
        .route("/api/events/emit-room", axum::routing::post(emit_room_event))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Operational surface (JWT required)
    let ops_routes = Router::new()
        .route("/api/queue/stats", axum::routing::get(queue_stats))
        .route("/api/presence", axum::routing::get(get_presence));

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/api/fleet/info", axum::routing::get(fleet_info));

    // WebSocket endpoint (auth via query param or bearer header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(emit_routes)
        .merge(ops_routes)
        .merge(public_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
