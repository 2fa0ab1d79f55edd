//! Observer-side connection manager for the Foreman notification channel.
//!
//! An observer holds one long-lived WebSocket to the server and receives
//! job/worker state-change events. The network is allowed to fail; this
//! crate makes a single connection resilient:
//!
//! - [`LinkState`] -- one explicit state machine owning every retry counter,
//!   so backoff and ceiling behaviour is unit-testable without I/O.
//! - [`reconnect`] -- exponential backoff with a capped delay and a bounded
//!   number of consecutive attempts.
//! - [`ObserverLink`] -- the driver task: connect, keepalive, decode inbound
//!   events, reconnect on abnormal closes, tear down cleanly.
//!
//! Delivery is at-least-once: after a reconnect the observer only receives
//! events emitted from then on, and is expected to resynchronize by
//! refetching job state directly.

pub mod client;
pub mod link;
pub mod messages;
pub mod reconnect;
pub mod state;

pub use link::{ObserverConfig, ObserverEvent, ObserverLink};
pub use messages::ServerMessage;
pub use reconnect::ReconnectConfig;
pub use state::{ConnState, LinkState, LossAction};

/// Errors surfaced by the observer connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Every allowed reconnect attempt failed; automatic retries stopped.
    #[error("Gave up after {attempts} consecutive reconnect attempts")]
    ReconnectCeilingExceeded { attempts: u32 },
}
