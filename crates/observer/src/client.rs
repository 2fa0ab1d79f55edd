//! WebSocket client for the Foreman observer endpoint.

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::ObserverError;

/// The raw stream type produced by a successful connect.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for one observer endpoint.
pub struct ObserverClient {
    ws_url: String,
}

impl ObserverClient {
    /// Create a client targeting the given WebSocket URL
    /// (e.g. `ws://host:3000/api/v1/ws`).
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open the channel. One call, one handshake; the caller owns
    /// suppression of concurrent attempts.
    pub async fn connect(&self) -> Result<WsStream, ObserverError> {
        let (ws_stream, _response) = connect_async(&self.ws_url).await.map_err(|e| {
            ObserverError::Connection(format!("Failed to connect to {}: {e}", self.ws_url))
        })?;

        tracing::debug!(url = %self.ws_url, "Observer channel connected");
        Ok(ws_stream)
    }
}
