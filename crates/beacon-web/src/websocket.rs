//! WebSocket transport adapter.
//!
//! Each upgraded socket becomes one session: a fresh [`ConnectionId`], a
//! bounded outbound queue registered with the coordinator, a writer task
//! draining that queue into the socket (with periodic pings), and a reader
//! feeding inbound frames back to the coordinator. Whichever side ends
//! first tears the session down, and the coordinator hears about it once.
//! A coordinator-side close ends the session even while a write is stuck
//! on a client that stopped reading.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use beacon_core::protocol::ServerMessage;
use beacon_core::{BeaconResult, BroadcastCoordinator, ClientConnection, ConnectionId};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Tracks the last time anything arrived from the client.
struct Liveness {
    started: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    fn mark_alive(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_seen_ms.store(now, Ordering::Relaxed);
    }

    fn silent_for(&self) -> Duration {
        let now = self.started.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_seen_ms.load(Ordering::Relaxed)))
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Run one client session from upgrade to disconnect.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = ConnectionId::generate();
    let (connection, mut rx) = ClientConnection::channel(id.clone(), state.client_buffer);
    let closed = connection.close_signal();
    if let Err(e) = state.coordinator.on_connect(id.clone(), Arc::new(connection)) {
        warn!(conn_id = %id, error = %e, "rejecting WebSocket session");
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    let liveness = Arc::new(Liveness::new());
    let ping_interval = state.ping_interval;
    let silence_limit = pong_timeout(ping_interval);

    // Queue closes when the coordinator drops this client's sink.
    let writer_id = id.clone();
    let writer_liveness = Arc::clone(&liveness);
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else {
                        debug!(conn_id = %writer_id, "outbound queue closed");
                        let _ = sender.send(Message::Close(None)).await;
                        return;
                    };
                    if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                        debug!(conn_id = %writer_id, "WebSocket send failed, client disconnected");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if writer_liveness.silent_for() > silence_limit {
                        warn!(conn_id = %writer_id, timeout = ?silence_limit, "client unresponsive, disconnecting");
                        return;
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    let coordinator = Arc::clone(&state.coordinator);
    let reader_id = id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            liveness.mark_alive();
            let outcome = match msg {
                Message::Text(ref t) => coordinator.on_message(&reader_id, t.as_str()),
                Message::Binary(ref data) => coordinator.on_binary(&reader_id, data),
                Message::Close(_) => {
                    debug!(conn_id = %reader_id, "WebSocket client sent close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            reply_to_rejection(&coordinator, &reader_id, outcome);
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        () = closed.cancelled() => {
            debug!(conn_id = %id, "session closed by coordinator");
            send_task.abort();
            recv_task.abort();
        }
    }

    info!(conn_id = %id, "WebSocket session ended");
    state.coordinator.on_disconnect(&id);
}

/// How long a client may stay silent before it counts as gone.
fn pong_timeout(ping_interval: Duration) -> Duration {
    ping_interval.saturating_mul(2)
}

/// Answer client mistakes in an inbound frame with an error frame.
fn reply_to_rejection(
    coordinator: &BroadcastCoordinator,
    id: &ConnectionId,
    outcome: BeaconResult<()>,
) {
    let Err(e) = outcome else {
        return;
    };
    if e.is_client_fault() {
        let reply = ServerMessage::error(e.to_string());
        if let Err(send_err) = coordinator.send(id, &reply) {
            debug!(conn_id = %id, error = %send_err, "could not report error to client");
        }
    } else {
        debug!(conn_id = %id, error = %e, "report not applied");
    }
}
