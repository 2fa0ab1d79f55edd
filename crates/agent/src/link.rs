//! WebSocket link to the server: heartbeat push and work-order handling.
//!
//! One connection carries everything. Outbound messages (heartbeats,
//! progress, terminal reports) funnel through a channel into a single
//! writer task, so the heartbeat never stalls behind a long-running unit
//! and execution tasks never contend for the sink.
//!
//! The link reconnects with a fixed delay when the connection drops; the
//! server tolerates the gap because worker staleness is judged by the
//! heartbeat timeout, not by the connection itself.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use foreman_core::wire::{TerminalOutcome, WorkerCommand, WorkerMessage};
use foreman_core::worker::WorkerStats;

use crate::config::AgentConfig;
use crate::executor::{UnitExecutor, WorkOrder};

/// Reconnection delay after a WebSocket failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Run the worker link indefinitely.
///
/// This function never returns under normal operation. It reconnects with
/// a fixed delay if the WebSocket connection drops; lifetime stats carry
/// across sessions.
pub async fn run(config: &AgentConfig, executor: Arc<dyn UnitExecutor>) {
    let stats = Arc::new(Mutex::new(WorkerStats::default()));

    loop {
        tracing::info!(url = %config.server_ws_url, "Connecting to Foreman server");

        match connect_async(&config.server_ws_url).await {
            Ok((ws_stream, _response)) => {
                tracing::info!(worker_id = %config.worker_id, "Worker link connected");
                run_session(ws_stream, config, &executor, &stats).await;
                tracing::warn!("Worker link session ended, reconnecting");
            }
            Err(e) => {
                tracing::error!(error = %e, "Worker link connection failed");
            }
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Drive a single session: heartbeat on a timer, handle incoming work
/// orders, and forward queued outbound messages -- all via `tokio::select!`.
async fn run_session(
    ws_stream: WsStream,
    config: &AgentConfig,
    executor: &Arc<dyn UnitExecutor>,
    stats: &Arc<Mutex<WorkerStats>>,
) {
    let (mut sink, mut stream) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let mut ticker = tokio::time::interval(config.heartbeat_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = *stats.lock().expect("stats lock");
                let heartbeat = WorkerMessage::Heartbeat {
                    worker_id: config.worker_id.clone(),
                    stats: snapshot,
                };
                if let Err(e) = send_message(&mut sink, &heartbeat).await {
                    tracing::error!(error = %e, "Failed to send heartbeat");
                    break;
                }
            }
            Some(message) = out_rx.recv() => {
                if let Err(e) = send_message(&mut sink, &message).await {
                    tracing::error!(error = %e, "Failed to send report");
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_incoming(&text, executor, stats, &out_tx);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Server closed the worker link");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Worker link receive error");
                        break;
                    }
                }
            }
        }
    }
}

/// Serialize and send one message over the sink.
async fn send_message(
    sink: &mut SplitSink<WsStream, Message>,
    message: &WorkerMessage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let payload = serde_json::to_string(message)?;
    sink.send(Message::Text(payload)).await?;
    Ok(())
}

/// Decode one incoming frame and act on it.
fn handle_incoming(
    text: &str,
    executor: &Arc<dyn UnitExecutor>,
    stats: &Arc<Mutex<WorkerStats>>,
    out_tx: &mpsc::UnboundedSender<WorkerMessage>,
) {
    let command = match serde_json::from_str::<WorkerCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed server message");
            return;
        }
    };

    match command {
        WorkerCommand::WorkOrder {
            job_id,
            count,
            test_mode,
        } => {
            tracing::info!(job_id = %job_id, count, test_mode, "Work order received");
            let order = WorkOrder {
                job_id,
                count,
                test_mode,
            };
            // Execute off the session loop so heartbeats keep flowing
            // while units run.
            tokio::spawn(execute_order(
                order,
                Arc::clone(executor),
                Arc::clone(stats),
                out_tx.clone(),
            ));
        }
    }
}

/// Run every unit of an order, reporting each outcome, then the terminal
/// report.
pub async fn execute_order(
    order: WorkOrder,
    executor: Arc<dyn UnitExecutor>,
    stats: Arc<Mutex<WorkerStats>>,
    out_tx: mpsc::UnboundedSender<WorkerMessage>,
) {
    let mut failed_units = 0u32;

    for unit in 0..order.count {
        let success = executor.execute_unit(&order, unit).await;
        if !success {
            failed_units += 1;
        }
        if out_tx
            .send(WorkerMessage::Progress {
                job_id: order.job_id,
                success,
            })
            .is_err()
        {
            // Session gone; the lease deadline handles the rest.
            tracing::warn!(job_id = %order.job_id, "Session closed mid-order, abandoning");
            return;
        }
    }

    stats
        .lock()
        .expect("stats lock")
        .record(failed_units == 0);

    let _ = out_tx.send(WorkerMessage::Terminal {
        job_id: order.job_id,
        outcome: TerminalOutcome::Completed,
        error: None,
    });
    tracing::info!(
        job_id = %order.job_id,
        units = order.count,
        failed_units,
        "Work order finished",
    );
}
