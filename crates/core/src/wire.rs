//! Message types exchanged over the WebSocket links.
//!
//! Two links exist:
//! - the **worker link** (`/api/v1/ws/workers`): typed, tagged envelopes in
//!   both directions ([`WorkerMessage`], [`WorkerCommand`]);
//! - the **observer channel** (`/api/v1/ws`): loosely-typed JSON objects
//!   `{type, job_id?, status?, progress?, data?, message?}` identified by
//!   the `MSG_TYPE_*` constants. The server builds these in
//!   `foreman-events`; the observer client parses them in
//!   `foreman-observer`.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, WorkerId};
use crate::worker::WorkerStats;

// ---------------------------------------------------------------------------
// Observer channel message types
// ---------------------------------------------------------------------------

/// A job changed status or made progress.
pub const MSG_TYPE_JOB_UPDATE: &str = "job_update";

/// A worker connected, disconnected, or went stale.
pub const MSG_TYPE_WORKER_STATUS: &str = "worker_status";

/// An error fact surfaced to observers.
pub const MSG_TYPE_ERROR: &str = "error";

/// Domain-specific passthrough: a worker produced an account record.
/// This core forwards it untouched.
pub const MSG_TYPE_ACCOUNT_CREATED: &str = "account_created";

/// Observer keepalive. Defends against the server's idle timeout; the
/// server is not required to reply.
pub const MSG_TYPE_PING: &str = "ping";

// ---------------------------------------------------------------------------
// Worker link envelopes
// ---------------------------------------------------------------------------

/// Messages a worker sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Periodic liveness signal with lifetime counters.
    Heartbeat {
        worker_id: WorkerId,
        #[serde(default)]
        stats: WorkerStats,
    },
    /// One work unit finished (successfully or not).
    Progress { job_id: JobId, success: bool },
    /// The worker finished or conclusively gave up on a job.
    Terminal {
        job_id: JobId,
        outcome: TerminalOutcome,
        #[serde(default)]
        error: Option<String>,
    },
    /// Domain-specific record announcement (e.g. a created account),
    /// passed through to observers untouched.
    AccountCreated {
        #[serde(default)]
        job_id: Option<JobId>,
        data: serde_json::Value,
    },
}

/// Terminal outcome a worker reports for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Completed,
    Failed,
}

/// Messages the server sends down a worker link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Execute a leased job. Fire-and-forget from the dispatcher's point of
    /// view; the lease deadline is the only timeout.
    WorkOrder {
        job_id: JobId,
        count: u32,
        test_mode: bool,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
