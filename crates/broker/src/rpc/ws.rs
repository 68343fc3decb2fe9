// WebSocket and HTTP surface of the broker.
//
// `/realtime` carries the subscription protocol; `/apply-diff` applies an
// LLM-proposed diff to submitted source; `/volume/{*path}` reads and writes
// files on the volume (persisting patched content is the caller's job, so
// it goes through these plain routes, not the patcher).

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use tablecast_common::diff::{apply_diff, extract_diff_block, PatchResult};
use tablecast_common::protocol::ws::{ServerMessage, SubscribeRequest};

use crate::registry::{ConnectionId, Subscription};
use crate::runtime::BrokerState;

pub fn router(state: BrokerState) -> Router {
    Router::new()
        .route("/realtime", get(realtime_ws_route))
        .route("/apply-diff", post(apply_diff_route))
        .route("/volume/{*path}", get(read_volume_route).post(write_volume_route))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: BrokerState) -> Result<()> {
    axum::serve(listener, router(state)).await.context("broker websocket server failed")
}

async fn realtime_ws_route(
    ws: WebSocketUpgrade,
    State(state): State<BrokerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The closed set of things that can happen to a realtime connection.
#[derive(Debug)]
enum ConnectionEvent {
    Connected,
    Subscribed(SubscribeRequest),
    Disconnected,
}

async fn handle_socket(socket: WebSocket, state: BrokerState) {
    let connection_id: ConnectionId = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    state.engine.register_sink(connection_id, outbound_tx);

    debug!(connection = %connection_id, "realtime connection opened");
    apply_event(&state, connection_id, ConnectionEvent::Connected);

    let (mut sender, mut receiver) = socket.split();

    // Outbound pump: everything the engine queues for this connection goes
    // out here, in sink order.
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(encoded) = serde_json::to_string(&message) else {
                break;
            };
            if sender.send(WsMessage::Text(encoded.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound loop: each frame is a subscribe descriptor.
    while let Some(frame_result) = receiver.next().await {
        let Ok(frame) = frame_result else {
            break;
        };
        match frame {
            WsMessage::Text(payload) => {
                handle_subscribe_frame(&state, connection_id, payload.as_bytes());
            }
            WsMessage::Binary(payload) => {
                handle_subscribe_frame(&state, connection_id, payload.as_ref());
            }
            // axum answers pings itself.
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            WsMessage::Close(_) => break,
        }
    }

    apply_event(&state, connection_id, ConnectionEvent::Disconnected);
    send_task.abort();
    let _ = send_task.await;
}

fn handle_subscribe_frame(state: &BrokerState, connection_id: ConnectionId, payload: &[u8]) {
    match serde_json::from_slice::<SubscribeRequest>(payload) {
        Ok(request) => apply_event(state, connection_id, ConnectionEvent::Subscribed(request)),
        Err(err) => {
            debug!(connection = %connection_id, error = %err, "malformed subscribe frame");
            state.engine.push(
                connection_id,
                ServerMessage::Error { message: format!("malformed subscribe request: {err}") },
            );
        }
    }
}

/// Per-connection state machine. Errors local to one event (bad descriptor,
/// unwatchable path) stay on that connection and leave any prior
/// subscription untouched.
fn apply_event(state: &BrokerState, connection_id: ConnectionId, event: ConnectionEvent) {
    match event {
        ConnectionEvent::Connected => {
            state.engine.push(connection_id, ServerMessage::Connected);
        }

        ConnectionEvent::Subscribed(request) => {
            let subscription = match Subscription::from_request(connection_id, &request) {
                Ok(subscription) => subscription,
                Err(err) => {
                    debug!(connection = %connection_id, error = %err, "subscribe rejected");
                    state
                        .engine
                        .push(connection_id, ServerMessage::Error { message: err.to_string() });
                    return;
                }
            };
            let file = match state.store.watch_path(&subscription.db_path) {
                Ok(file) => file,
                Err(err) => {
                    warn!(connection = %connection_id, error = %err, "unwatchable database id");
                    state
                        .engine
                        .push(connection_id, ServerMessage::Error { message: err.to_string() });
                    return;
                }
            };

            // The snapshot is queued before the subscription becomes visible
            // to broadcast cycles, so a connection can never receive an
            // update ahead of its initial.
            state.engine.send_initial(&subscription);
            let previous = state.registry.subscribe(subscription.clone());
            state.watcher.ensure_watch(&subscription.db_path, &file);
            if let Some(previous) = previous {
                state.watcher.release_watch(&previous.db_path);
            }
        }

        ConnectionEvent::Disconnected => {
            state.engine.remove_sink(connection_id);
            if let Some(subscription) = state.registry.unsubscribe(connection_id) {
                state.watcher.release_watch(&subscription.db_path);
            }
            debug!(connection = %connection_id, "realtime connection closed");
        }
    }
}

// ── Diff + volume routes ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApplyDiffRequest {
    code: String,
    diff: String,
}

/// Apply an accepted diff to the submitted source. `diff` may be the raw
/// assistant message; a `<code_diff>` block is extracted when present.
/// Unmatched hunks are reported, never fatal.
async fn apply_diff_route(Json(request): Json<ApplyDiffRequest>) -> Json<PatchResult> {
    let diff = extract_diff_block(&request.diff).unwrap_or(&request.diff);
    Json(apply_diff(&request.code, diff))
}

async fn read_volume_route(
    Path(path): Path<String>,
    State(state): State<BrokerState>,
) -> Response {
    match state.store.read_file(&path) {
        Ok(content) => content.into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn write_volume_route(
    Path(path): Path<String>,
    State(state): State<BrokerState>,
    body: String,
) -> Response {
    match state.store.write_file(&path, &body) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}
