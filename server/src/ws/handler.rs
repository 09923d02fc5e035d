use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket upgrade.
/// Browser clients cannot set headers on a WebSocket, so auth rides in
/// ?token=JWT; native clients may use Authorization: Bearer instead.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes for terminal auth rejection:
/// 4001 = token expired
/// 4002 = token invalid or missing
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. On auth failure, upgrades then immediately
/// closes with the appropriate close code — the connection never reaches
/// the registry. On success, spawns the connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.token.clone().or_else(|| bearer_token(&headers));
    let Some(token) = token else {
        tracing::warn!("WebSocket upgrade without credential");
        return reject(ws, CLOSE_TOKEN_INVALID, "Missing credential");
    };

    match jwt::validate_access_token(&state.jwt_secret, &token) {
        Ok(claims) => {
            tracing::info!(user_id = %claims.sub, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims.sub))
        }
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(close_code, reason, "WebSocket auth failed");
            reject(ws, close_code, reason)
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// Terminal rejection: upgrade, send the close frame, done. A failed auth is
/// final — the client must reconnect with a fresh token.
fn reject(ws: WebSocketUpgrade, code: u16, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
