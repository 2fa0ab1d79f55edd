//! Worker WebSocket link.
//!
//! A worker daemon connects here and keeps one link open for everything:
//! heartbeats and job reports flow in, work orders flow out. The worker's
//! identity is learned from its first heartbeat; the link is attached to
//! the registry at that point and detached when the socket drops.
//!
//! A dropped link does not fail the worker's leased job -- the lease
//! deadline is the only abandonment signal.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use foreman_core::types::WorkerId;
use foreman_core::wire::{WorkerCommand, WorkerMessage};
use foreman_events::NotificationEvent;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn worker_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single worker link after upgrade.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // Outbound half: work orders queued by the dispatcher.
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerCommand>();
    let send_task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let payload = match serde_json::to_string(&command) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize work order");
                    continue;
                }
            };
            if sink.send(Message::Text(payload.into())).await.is_err() {
                tracing::debug!("Worker sink closed");
                break;
            }
        }
    });

    // The identity arrives with the first heartbeat.
    let mut registered: Option<WorkerId> = None;

    while let Some(result) = stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "Worker receive error");
                break;
            }
        };

        let message = match serde_json::from_str::<WorkerMessage>(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed worker message");
                continue;
            }
        };

        match message {
            WorkerMessage::Heartbeat { worker_id, stats } => {
                if registered.is_none() {
                    match state.registry.register_link(&worker_id, tx.clone()).await {
                        Ok(is_new) => {
                            tracing::info!(worker_id = %worker_id, is_new, "Worker link attached");
                            registered = Some(worker_id.clone());
                            state
                                .bus
                                .publish(NotificationEvent::worker_status(&worker_id, true));
                        }
                        Err(e) => {
                            tracing::warn!(worker_id = %worker_id, error = %e, "Worker rejected");
                            break;
                        }
                    }
                }
                if let Err(e) = state.registry.heartbeat(&worker_id, stats).await {
                    tracing::warn!(worker_id = %worker_id, error = %e, "Heartbeat rejected");
                }
            }
            WorkerMessage::Progress { job_id, success } => {
                if let Err(e) = state.service.report_progress(job_id, success).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Progress report rejected");
                }
            }
            WorkerMessage::Terminal {
                job_id,
                outcome,
                error,
            } => {
                if let Err(e) = state.service.report_terminal(job_id, outcome, error).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Terminal report rejected");
                }
            }
            WorkerMessage::AccountCreated { job_id, data } => {
                // Domain payload: forwarded to observers untouched.
                state
                    .bus
                    .publish(NotificationEvent::account_created(job_id, data));
            }
        }
    }

    if let Some(worker_id) = registered {
        state.registry.detach_link(&worker_id).await;
        state
            .bus
            .publish(NotificationEvent::worker_status(&worker_id, false));
        tracing::info!(worker_id = %worker_id, "Worker link detached");
    }
    send_task.abort();
}
