//! Priority constants and dispatch defaults.
//!
//! These live in `core` (zero internal deps) so the API server, the worker
//! agent, and tooling agree on the same numbers.

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent jobs. Dispatched before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal jobs. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background jobs. Dispatched last.
pub const PRIORITY_BACKGROUND: i32 = -10;

// ---------------------------------------------------------------------------
// Dispatch defaults
// ---------------------------------------------------------------------------

/// How many times an abandoned lease may be requeued before the job is
/// failed outright.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default lease duration granted to a worker per dispatch.
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 60;

/// Default dispatcher poll interval.
pub const DEFAULT_DISPATCH_INTERVAL_MS: u64 = 1_000;
