use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::presence::{self, Identity, Role};
use crate::state::AppState;
use crate::ws::protocol::{self, ServerEvent};

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming frames, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system to push frames to this
/// client by cloning the sender out of the presence registry.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register before anything else: the identity's own room (and, for
    // admins, the shared admin room) exists from this point on.
    state
        .registry
        .register(&identity.id, identity.role, tx.clone());

    // End-user presence is durable; admins only occupy the live registry.
    if identity.role == Role::User {
        presence::mark_online(&state.db, &identity.id).await;
        state.registry.broadcast(&ServerEvent::PresenceUpdate {
            user_id: identity.id.clone(),
            is_online: true,
            last_seen: None,
        });
    }

    // Current presence snapshot for the newly connected client
    protocol::send_event(
        &tx,
        &ServerEvent::OnlineUsers(state.registry.snapshot_identities()),
    );

    tracing::info!(
        identity = %identity.id,
        role = ?identity.role,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to the WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

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

    // Reader loop: one frame's handler completes (persist + dispatch)
    // before this connection's next frame is processed.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_frame(text.as_str(), &tx, &state, &identity).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        identity = %identity.id,
                        "Ignoring binary frame (protocol is JSON text)"
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
                        identity = %identity.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    identity = %identity.id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(identity = %identity.id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Drop this connection; the durable offline update and the presence
    // broadcast fire only when it was the identity's last one.
    let fully_offline = state.registry.unregister(&identity.id, &tx);

    if fully_offline && identity.role == Role::User {
        let last_seen = presence::mark_offline(&state.db, &identity.id).await;
        state.registry.broadcast(&ServerEvent::PresenceUpdate {
            user_id: identity.id.clone(),
            is_online: false,
            last_seen,
        });
    }

    tracing::info!(identity = %identity.id, "WebSocket actor stopped");
}

/// Writer task: receives messages from the mpsc channel and forwards them
/// to the WebSocket sink.
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
