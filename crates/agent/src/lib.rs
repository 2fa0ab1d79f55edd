//! `foreman-agent` library crate.
//!
//! The worker daemon: keeps one WebSocket link to the Foreman server,
//! heartbeats on an interval, executes received work orders through a
//! pluggable [`executor::UnitExecutor`], and reports per-unit progress and
//! terminal outcomes over the same link.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod executor;
pub mod link;
