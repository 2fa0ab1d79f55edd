//! Observer WebSocket endpoint.
//!
//! After the upgrade the connection is registered with [`ObserverHub`] and
//! served by two halves: a spawned sender task forwarding hub messages to
//! the sink, and the inbound loop on the current task. Inbound traffic is
//! only keepalive pings -- any frame refreshes the idle clock; the pings
//! themselves need no reply.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use foreman_core::wire::MSG_TYPE_PING;

use crate::state::AppState;
use crate::ws::manager::ObserverHub;

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn observer_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Manage a single observer connection after upgrade.
async fn handle_socket(socket: WebSocket, hub: Arc<ObserverHub>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "Observer connected");

    let mut rx = hub.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward hub messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "Observer sink closed");
                break;
            }
        }
    });

    // Inbound loop: every frame counts as activity.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Text(text)) => {
                hub.touch(&conn_id).await;
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) if value["type"] == MSG_TYPE_PING => {
                        tracing::trace!(conn_id = %conn_id, "Observer keepalive");
                    }
                    Ok(value) => {
                        tracing::debug!(
                            conn_id = %conn_id,
                            msg_type = %value["type"],
                            "Ignoring unexpected observer message",
                        );
                    }
                    Err(e) => {
                        tracing::debug!(conn_id = %conn_id, error = %e, "Unparseable observer frame");
                    }
                }
            }
            Ok(Message::Pong(_)) => {
                hub.touch(&conn_id).await;
            }
            Ok(_) => {
                hub.touch(&conn_id).await;
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "Observer receive error");
                break;
            }
        }
    }

    hub.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "Observer disconnected");
}
