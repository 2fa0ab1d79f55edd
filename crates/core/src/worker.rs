//! Worker health constants, cumulative stats, and name validation.
//!
//! Pure functions and constants used by both the API server and the worker
//! agent.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How often a worker agent sends a heartbeat.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// If a worker has not sent a heartbeat within this many seconds, it is
/// considered stale and is excluded from job assignment. Three intervals of
/// tolerance absorbs network jitter without keeping dead workers eligible.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 90;

/// Maximum length of a worker name.
const MAX_NAME_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Cumulative stats
// ---------------------------------------------------------------------------

/// Lifetime counters reported by a worker with every heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
}

impl WorkerStats {
    /// Record one finished job.
    pub fn record(&mut self, succeeded: bool) {
        self.jobs_processed += 1;
        if succeeded {
            self.jobs_succeeded += 1;
        } else {
            self.jobs_failed += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a worker name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_worker_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Worker name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Worker name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(
            "Worker name may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- validate_worker_name -----------------------------------------------

    #[test]
    fn valid_worker_name() {
        assert!(validate_worker_name("worker-01.prod").is_ok());
    }

    #[test]
    fn empty_worker_name_rejected() {
        assert!(validate_worker_name("").is_err());
    }

    #[test]
    fn worker_name_with_spaces_rejected() {
        assert!(validate_worker_name("worker 01").is_err());
    }

    #[test]
    fn worker_name_too_long_rejected() {
        let name = "a".repeat(MAX_NAME_LEN + 1);
        assert!(validate_worker_name(&name).is_err());
    }

    // -- stats --------------------------------------------------------------

    #[test]
    fn record_keeps_processed_as_sum_of_outcomes() {
        let mut stats = WorkerStats::default();
        stats.record(true);
        stats.record(true);
        stats.record(false);
        assert_eq!(stats.jobs_processed, 3);
        assert_eq!(stats.jobs_succeeded, 2);
        assert_eq!(stats.jobs_failed, 1);
    }

    #[test]
    fn timeout_covers_multiple_intervals() {
        assert!(HEARTBEAT_TIMEOUT_SECS >= 2 * HEARTBEAT_INTERVAL_SECS);
    }
}
