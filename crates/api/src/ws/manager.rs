//! Observer connection fan-out.
//!
//! Each observer connection owns a **bounded** outbound buffer. Delivery
//! to one connection never blocks on another: `broadcast` uses `try_send`,
//! and a connection whose buffer is full (a stalled reader) is dropped on
//! the spot -- it is expected to reconnect and resynchronize by refetching.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use chrono::Utc;
use foreman_core::types::Timestamp;
use tokio::sync::{mpsc, RwLock};

/// Outbound buffer size per observer connection.
pub const SEND_BUFFER: usize = 256;

/// Channel sender half for pushing messages to one observer connection.
pub type ObserverSender = mpsc::Sender<Message>;

/// Metadata for a single observer connection.
struct ObserverConn {
    sender: ObserverSender,
    connected_at: Timestamp,
    /// Refreshed on every inbound frame (keepalive pings included); idle
    /// connections past the timeout are culled by the heartbeat task.
    last_active: Timestamp,
}

/// Manages all live observer connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. Explicitly constructed and injected --
/// never an ambient singleton -- so tests can run isolated instances.
pub struct ObserverHub {
    connections: RwLock<HashMap<String, ObserverConn>>,
    idle_timeout: chrono::Duration,
}

impl ObserverHub {
    pub fn new(idle_timeout: chrono::Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Register a connection. Returns the receiver half of its outbound
    /// buffer so the caller can forward messages to the WebSocket sink.
    /// Re-adding an existing id replaces (and thereby disconnects) the old
    /// connection.
    pub async fn add(&self, conn_id: String) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(SEND_BUFFER);
        let now = Utc::now();
        let conn = ObserverConn {
            sender: tx,
            connected_at: now,
            last_active: now,
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a connection by id. Removing an unknown id is a no-op.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Refresh a connection's activity clock (called on every inbound
    /// frame).
    pub async fn touch(&self, conn_id: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(conn_id) {
            conn.last_active = Utc::now();
        }
    }

    /// Deliver a message to every live connection; isolated per
    /// connection. Stalled connections (full buffer) and closed ones are
    /// dropped. Returns how many connections received the message.
    ///
    /// Broadcasting to zero connections is a no-op.
    pub async fn broadcast(&self, message: Message) -> usize {
        let mut dead: Vec<String> = Vec::new();
        let mut delivered = 0;

        {
            let conns = self.connections.read().await;
            for (conn_id, conn) in conns.iter() {
                match conn.sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(conn_id = %conn_id, "Observer too slow, dropping connection");
                        dead.push(conn_id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(conn_id.clone());
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut conns = self.connections.write().await;
            for conn_id in dead {
                conns.remove(&conn_id);
            }
        }

        delivered
    }

    /// Send a Ping frame to every connection (server-side liveness probe).
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.try_send(Message::Ping(Bytes::new()));
        }
    }

    /// Drop connections that have been silent past the idle timeout.
    /// Returns the ids that were culled.
    pub async fn prune_idle(&self) -> Vec<String> {
        let now = Utc::now();
        let mut conns = self.connections.write().await;
        let idle: Vec<String> = conns
            .iter()
            .filter(|(_, conn)| now - conn.last_active > self.idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for conn_id in &idle {
            if let Some(conn) = conns.remove(conn_id) {
                let _ = conn.sender.try_send(Message::Close(None));
                tracing::info!(
                    conn_id = %conn_id,
                    connected_at = %conn.connected_at,
                    "Disconnected idle observer",
                );
            }
        }
        idle
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map. Used
    /// during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.try_send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all observer connections");
    }
}
