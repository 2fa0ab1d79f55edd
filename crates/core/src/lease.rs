//! Time-bounded bindings between one job and one worker.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp, WorkerId};

/// A lease binds exactly one job to exactly one worker until a deadline.
///
/// A lease that reaches its deadline without a progress or terminal report
/// is considered abandoned and becomes eligible for reclamation by the
/// dispatcher's next cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: JobId,
    pub worker_id: WorkerId,
    pub granted_at: Timestamp,
    pub deadline: Timestamp,
}

impl Lease {
    /// Grant a lease starting at `now` with the given duration.
    pub fn grant(
        job_id: JobId,
        worker_id: WorkerId,
        now: Timestamp,
        duration: chrono::Duration,
    ) -> Self {
        Self {
            job_id,
            worker_id,
            granted_at: now,
            deadline: now + duration,
        }
    }

    /// Whether the deadline has passed as of `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.deadline
    }

    /// Push the deadline forward (progress reports count as signs of life).
    pub fn extend(&mut self, now: Timestamp, duration: chrono::Duration) {
        self.deadline = now + duration;
    }
}
