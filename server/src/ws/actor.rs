use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::presence;
use crate::rooms;
use crate::state::AppState;
use crate::ws::protocol::{self, Disposition, Envelope};
use crate::ws::registry::ConnectionHandle;

/// Ping interval: server sends a WebSocket ping every 30 seconds so
/// connections that died without a close frame get reaped.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if no pong arrives within 10 seconds after a ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the socket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes incoming envelopes and dispatches them
///
/// Registration, the offline-queue flush, and the presence transition all
/// happen before the first inbound frame is processed, and the queued
/// backlog reaches the client before any other room traffic.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let handle = ConnectionHandle::new(&user_id, tx.clone());

    let first_connection = state.registry.register(handle.clone());

    // Every connection lives in its owner's personal room so user-targeted
    // fleet fan-out reaches this process.
    let own_room = rooms::user_room(&user_id);
    if state.registry.join_room(&handle, &own_room) {
        state.fleet.subscribe_room(&own_room);
    }

    tracing::info!(
        user_id = %user_id,
        connection_id = %handle.id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to the WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Replay undelivered messages before anything else is pushed.
    flush_offline_queue(&state, &handle).await;

    if first_connection {
        presence::mark_online(&state, &user_id);
    }
    // The new client gets the current online snapshot.
    presence::send_snapshot(&state, &handle);

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    match protocol::handle_text_message(text.as_str(), &handle, &state).await {
                        Disposition::Continue => {}
                        Disposition::Close(code, reason) => {
                            tracing::warn!(
                                user_id = %user_id,
                                connection_id = %handle.id,
                                code,
                                reason,
                                "closing connection by policy"
                            );
                            let _ = tx.send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })));
                            break;
                        }
                    }
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        user_id = %user_id,
                        "ignoring binary frame (protocol is JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort helper tasks, then synchronously remove every trace of
    // this connection before the actor returns.
    writer_handle.abort();
    ping_handle.abort();

    let outcome = state.registry.unregister(&handle);
    state.limiter.remove(handle.id);
    for room in &outcome.emptied_rooms {
        state.fleet.unsubscribe_room(room);
    }
    if outcome.user_now_unreachable {
        presence::mark_offline(&state, &user_id);
    }

    tracing::info!(
        user_id = %user_id,
        connection_id = %handle.id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from the mpsc channel and forwards them to
/// the WebSocket sink until either side goes away.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}

/// Drain-and-flush the offline queue for a freshly registered connection.
/// A fully flushed batch clears the queue; a writer that dies mid-batch
/// removes only the messages that made it out, so the rest survive for the
/// next reconnect.
async fn flush_offline_queue(state: &AppState, handle: &ConnectionHandle) {
    let pending = state.queue.drain(&handle.user_id).await;
    if pending.is_empty() {
        return;
    }

    let total = pending.len();
    let mut delivered: Vec<String> = Vec::with_capacity(total);
    for msg in &pending {
        let envelope = Envelope::new(&msg.event, msg.payload.clone());
        let frame = match envelope.to_message() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    message_id = %msg.id,
                    error = %e,
                    "dropping unencodable queued message"
                );
                delivered.push(msg.id.clone());
                continue;
            }
        };
        if handle.send(frame) {
            delivered.push(msg.id.clone());
        } else {
            break;
        }
    }

    if delivered.len() == total {
        state.queue.clear(&handle.user_id).await;
    } else {
        for id in &delivered {
            state.queue.remove_message(&handle.user_id, id).await;
        }
    }

    tracing::info!(
        user_id = %handle.user_id,
        delivered = delivered.len(),
        total,
        "flushed offline queue"
    );
}
