//! The observer link driver: connect, keepalive, decode, reconnect.
//!
//! [`ObserverLink::start`] spawns a single task that owns the WebSocket
//! stream and a [`LinkState`]. The task runs a connect → session →
//! reconnect loop until torn down; every timer it arms (keepalive ticker,
//! backoff sleep) is dropped or cancelled on every exit path.
//!
//! Independent links share nothing: each `start` call builds its own state
//! machine, channel, and cancellation token.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{ObserverClient, WsStream};
use crate::messages::{keepalive_ping, ServerMessage};
use crate::reconnect::ReconnectConfig;
use crate::state::{LinkState, LossAction};
use crate::ObserverError;

/// Default interval for client→server keepalive pings. Must stay strictly
/// below the server's idle timeout (2 minutes).
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Configuration and events
// ---------------------------------------------------------------------------

/// Configuration for one observer link.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Observer endpoint, e.g. `ws://host:3000/api/v1/ws`.
    pub ws_url: String,
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl ObserverConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// What the link reports to the registered callback.
#[derive(Debug)]
pub enum ObserverEvent {
    /// The channel opened (initial connect or successful reconnect).
    Connected,
    /// A decoded server message.
    Message(ServerMessage),
    /// Abnormal loss; a reconnect is scheduled after `retry_in`.
    Disconnected { retry_in: Duration },
    /// The server closed the channel normally; no reconnect follows.
    Closed,
    /// Automatic reconnection stopped (ceiling exceeded). Only a manual
    /// [`ObserverLink::reconnect`] resumes.
    Failed(ObserverError),
}

type ObserverCallback = Arc<dyn Fn(ObserverEvent) + Send + Sync>;

enum LinkCommand {
    Reconnect,
}

/// How a session (or connect attempt) ended.
enum SessionEnd {
    Shutdown,
    Normal,
    Abnormal,
    ManualReconnect,
}

// ---------------------------------------------------------------------------
// ObserverLink
// ---------------------------------------------------------------------------

/// Handle to a running observer link task.
pub struct ObserverLink {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<LinkCommand>,
    task: tokio::task::JoinHandle<()>,
}

impl ObserverLink {
    /// Spawn the link task. `callback` receives every [`ObserverEvent`];
    /// it must not block.
    pub fn start(
        config: ObserverConfig,
        callback: impl Fn(ObserverEvent) + Send + Sync + 'static,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(
            config,
            Arc::new(callback) as ObserverCallback,
            cancel.clone(),
            cmd_rx,
        ));
        Self {
            cancel,
            commands: cmd_tx,
            task,
        }
    }

    /// Manually reconnect: resets the retry counters and retries
    /// immediately, whatever state the link is in.
    pub fn reconnect(&self) {
        let _ = self.commands.send(LinkCommand::Reconnect);
    }

    /// Tear the link down: cancels pending reconnect and keepalive timers
    /// and closes the channel with a normal code, so no reconnection is
    /// attempted.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// Driver loop
// ---------------------------------------------------------------------------

async fn run_link(
    config: ObserverConfig,
    callback: ObserverCallback,
    cancel: CancellationToken,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let client = ObserverClient::new(config.ws_url.clone());
    let mut link = LinkState::new(config.reconnect.clone());

    loop {
        if cancel.is_cancelled() {
            return;
        }
        if !link.begin_connect() {
            // Single-task driver: a second in-flight connect cannot happen.
            tracing::error!("Connect attempted while one is already in flight");
            return;
        }

        let session_end = tokio::select! {
            _ = cancel.cancelled() => return,
            result = client.connect() => match result {
                Ok(ws) => {
                    link.connected();
                    callback(ObserverEvent::Connected);
                    run_session(ws, &config, &callback, &cancel, &mut commands).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Observer connect failed");
                    SessionEnd::Abnormal
                }
            }
        };

        match session_end {
            SessionEnd::Shutdown => return,
            SessionEnd::ManualReconnect => {
                link.reset();
            }
            SessionEnd::Normal => {
                link.connection_lost(true);
                callback(ObserverEvent::Closed);
                if !wait_for_reconnect_command(&cancel, &mut commands).await {
                    return;
                }
                link.reset();
            }
            SessionEnd::Abnormal => match link.connection_lost(false) {
                LossAction::ReconnectAfter(delay) => {
                    callback(ObserverEvent::Disconnected { retry_in: delay });
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                        Some(LinkCommand::Reconnect) = commands.recv() => {
                            link.reset();
                        }
                    }
                }
                LossAction::GiveUp => {
                    callback(ObserverEvent::Failed(
                        ObserverError::ReconnectCeilingExceeded {
                            attempts: link.attempts(),
                        },
                    ));
                    if !wait_for_reconnect_command(&cancel, &mut commands).await {
                        return;
                    }
                    link.reset();
                }
                // Abnormal losses never map to Stop.
                LossAction::Stop => return,
            },
        }
    }
}

/// Block until a manual reconnect arrives. Returns `false` on teardown (or
/// when the handle was dropped), meaning the task should exit.
async fn wait_for_reconnect_command(
    cancel: &CancellationToken,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        cmd = commands.recv() => matches!(cmd, Some(LinkCommand::Reconnect)),
    }
}

/// Drive one live session until the channel closes or teardown.
async fn run_session(
    ws: WsStream,
    config: &ObserverConfig,
    callback: &ObserverCallback,
    cancel: &CancellationToken,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let mut keepalive = tokio::time::interval(config.keepalive_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(close_frame("shutdown")).await;
                return SessionEnd::Shutdown;
            }
            cmd = commands.recv() => {
                let _ = sink.send(close_frame("reconnect")).await;
                return match cmd {
                    Some(LinkCommand::Reconnect) => SessionEnd::ManualReconnect,
                    None => SessionEnd::Shutdown,
                };
            }
            _ = keepalive.tick() => {
                if sink.send(Message::Text(keepalive_ping())).await.is_err() {
                    tracing::warn!("Keepalive send failed, treating the link as lost");
                    return SessionEnd::Abnormal;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match ServerMessage::parse(&text) {
                    Ok(msg) => callback(ObserverEvent::Message(msg)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed observer payload");
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => return classify_close(frame),
                Some(Ok(_)) => {
                    // Binary frames are not part of the observer protocol.
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Observer receive error");
                    return SessionEnd::Abnormal;
                }
                None => {
                    // Dropped without a close frame -- the 1006 case.
                    tracing::warn!("Observer channel dropped without a close frame (code 1006)");
                    return SessionEnd::Abnormal;
                }
            }
        }
    }
}

fn close_frame(reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: reason.into(),
    }))
}

/// Map a received close frame to how the session ended. Codes 1000/1001
/// are normal; everything else triggers the reconnect path, with 1006
/// logged distinctly.
fn classify_close(frame: Option<CloseFrame<'_>>) -> SessionEnd {
    match frame {
        Some(f) if matches!(f.code, CloseCode::Normal | CloseCode::Away) => {
            tracing::info!(code = u16::from(f.code), "Observer channel closed normally");
            SessionEnd::Normal
        }
        Some(f) => {
            if f.code == CloseCode::Abnormal {
                tracing::warn!("Observer channel closed with code 1006 (abnormal closure)");
            } else {
                tracing::warn!(
                    code = u16::from(f.code),
                    reason = %f.reason,
                    "Observer channel closed abnormally",
                );
            }
            SessionEnd::Abnormal
        }
        None => {
            tracing::warn!("Observer channel closed without a close code");
            SessionEnd::Abnormal
        }
    }
}
