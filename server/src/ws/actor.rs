use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::chat::presence;
use crate::config::WsConfig;
use crate::state::AppState;
use crate::ws::protocol::{self, AuthState, ConnectionContext};
use crate::ws::{ConnectionHandle, ConnectionSender};

/// Close code sent when a pong does not arrive in time.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Run one WebSocket connection until it closes.
///
/// The socket is split: a writer task owns the sink and drains the
/// connection's mpsc channel, while this task reads frames and hands them to
/// the dispatcher. Anything that wants to reach this client clones the
/// sender held by its [`ConnectionHandle`].
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let handle = ConnectionHandle::new(tx.clone());
    let connection_id = handle.id();
    let mut ctx = ConnectionContext::new(handle);

    tracing::info!(connection_id = %connection_id, "WebSocket actor started");

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, pong_rx) = watch::channel(());
    let dead = Arc::new(Notify::new());
    let ping_handle = spawn_keepalive(&state.ws, tx.clone(), pong_rx, dead.clone());

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = dead.notified() => {
                tracing::info!(connection_id = %connection_id, "Peer unresponsive, dropping connection");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &mut ctx, &state).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    pong_tx.send_replace(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    if let Some(ping_handle) = ping_handle {
        ping_handle.abort();
    }

    disconnect(&ctx, &state).await;

    tracing::info!(connection_id = %connection_id, "WebSocket actor stopped");
}

/// Drop the connection from the registry and tell everyone else.
/// A connection that never authenticated leaves no trace.
pub async fn disconnect(ctx: &ConnectionContext, state: &AppState) {
    let AuthState::Authenticated { user_id } = &ctx.auth else {
        return;
    };

    state.registry.unregister(user_id, ctx.handle.id());
    presence::broadcast_roster(state).await;

    tracing::info!(
        user_id = %user_id,
        connection_id = %ctx.handle.id(),
        still_online = state.registry.is_online(user_id),
        "Connection closed"
    );
}

/// Periodic ping with a pong deadline. Returns `None` when disabled.
///
/// Only a pong that arrives after the latest ping counts. On a missed
/// deadline the peer is sent a close frame and `dead` is notified so the
/// reader stops waiting on it.
fn spawn_keepalive(
    config: &WsConfig,
    ping_tx: ConnectionSender,
    mut pong_rx: watch::Receiver<()>,
    dead: Arc<Notify>,
) -> Option<JoinHandle<()>> {
    if config.ping_interval_secs == 0 {
        return None;
    }
    let ping_every = Duration::from_secs(config.ping_interval_secs);
    let pong_timeout = Duration::from_secs(config.pong_timeout_secs.max(1));

    Some(tokio::spawn(async move {
        let mut ping_timer = interval(ping_every);
        // First tick fires immediately
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            // Forget pongs nobody asked for
            pong_rx.borrow_and_update();

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            match timeout(pong_timeout, pong_rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break,
                Err(_) => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "Pong timeout".into(),
                    })));
                    dead.notify_one();
                    break;
                }
            }
        }
    }))
}

/// Forward queued messages to the socket until either side goes away.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
