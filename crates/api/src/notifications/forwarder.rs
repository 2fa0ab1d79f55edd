//! Bridges the notification bus onto the observer channel.
//!
//! [`EventForwarder`] consumes every [`NotificationEvent`] published on the
//! bus, serializes it to the observer wire format, and hands it to the
//! [`ObserverHub`] for fan-out. It is the only component that touches both
//! sides, so neither the engine nor the hub knows about the other.

use std::sync::Arc;

use axum::extract::ws::Message;
use foreman_events::NotificationEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::ws::manager::ObserverHub;

pub struct EventForwarder {
    hub: Arc<ObserverHub>,
}

impl EventForwarder {
    pub fn new(hub: Arc<ObserverHub>) -> Self {
        Self { hub }
    }

    /// Run the forwarding loop until the bus closes or teardown.
    pub async fn run(
        self,
        mut receiver: broadcast::Receiver<NotificationEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Event forwarder shutting down");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(event) => {
                        let payload = event.to_wire_json().to_string();
                        let delivered = self.hub.broadcast(Message::Text(payload.into())).await;
                        tracing::trace!(
                            kind = event.kind.as_str(),
                            delivered,
                            "Event forwarded to observers",
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event forwarder lagged, observers missed events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, forwarder shutting down");
                        break;
                    }
                }
            }
        }
    }
}
