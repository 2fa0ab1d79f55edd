//! Foreman notification bus.
//!
//! - [`NotificationEvent`] -- an immutable fact about a job or worker state
//!   change, with its observer-channel wire representation.
//! - [`EventBus`] -- in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//!
//! Events are fire-and-forget broadcast payloads: the bus keeps no history,
//! and a newly subscribed receiver only sees events published after it
//! subscribed. Recovering missed state is the observer's responsibility
//! (full refetch after reconnect).

pub mod bus;

pub use bus::{EventBus, EventKind, NotificationEvent};
