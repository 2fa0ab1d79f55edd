//! Job model and lifecycle state machine.
//!
//! A [`Job`] is a unit of dispatchable work: a requested number of units,
//! a lifecycle status, and progress counters. Every lifecycle mutation goes
//! through the methods on [`Job`], which consult the transition table in
//! [`valid_transitions`] -- the single authority on what is allowed.
//!
//! Derived values (progress percent, success rate, duration) are computed
//! on read and never stored.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::scheduling::DEFAULT_MAX_RETRIES;
use crate::types::{JobId, Timestamp, WorkerId};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Wire/storage representation, matching the serde rename.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the wire representation. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Returns the set of valid target statuses reachable from `from`.
///
/// Terminal states return an empty slice. Note there is no path back to
/// `Pending` from anywhere -- requeued work keeps its current status.
pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
    match from {
        JobStatus::Pending => &[JobStatus::Running, JobStatus::Failed, JobStatus::Cancelled],
        JobStatus::Running => &[
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ],
        JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => &[],
    }
}

/// Check whether a transition from `from` to `to` is valid.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    valid_transitions(from).contains(&to)
}

// ---------------------------------------------------------------------------
// Job model
// ---------------------------------------------------------------------------

/// A unit of dispatchable work.
///
/// Invariants maintained by the mutation methods:
/// - `progress == successful + failed`
/// - `progress <= count`
/// - `started_at` is set iff the job ever left `Pending`
/// - `completed_at` is set iff the status is terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Requested number of work units. Always positive (validated at
    /// submission).
    pub count: u32,
    pub status: JobStatus,
    pub progress: u32,
    pub successful: u32,
    pub failed: u32,
    /// Higher priority dispatches sooner.
    pub priority: i32,
    /// Lease-reclaim budget: how many times an abandoned lease may be
    /// requeued before the job is failed.
    pub max_retries: u32,
    pub retry_count: u32,
    /// Current lease holder, if any.
    pub worker_id: Option<WorkerId>,
    pub lease_expires_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error_msg: Option<String>,
    /// Opaque side-effect policy flag, passed through to the worker.
    pub test_mode: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Bumped by the store on every successful update; stale writes are
    /// rejected as conflicts.
    pub version: i64,
}

impl Job {
    /// Create a new job in `Pending` status.
    pub fn new(count: u32, priority: i32, test_mode: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            count,
            status: JobStatus::Pending,
            progress: 0,
            successful: 0,
            failed: 0,
            priority,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_count: 0,
            worker_id: None,
            lease_expires_at: None,
            started_at: None,
            completed_at: None,
            error_msg: None,
            test_mode,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Apply a status transition, or fail with `InvalidTransition`.
    fn transition(&mut self, to: JobStatus) -> Result<(), CoreError> {
        if !can_transition(self.status, to) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `Pending -> Running`. Sets `started_at`.
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.status != JobStatus::Pending {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: JobStatus::Running,
            });
        }
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the outcome of one work unit. Only permitted while `Running`.
    pub fn increment_progress(&mut self, success: bool) -> Result<(), CoreError> {
        if self.status != JobStatus::Running {
            return Err(CoreError::Validation(format!(
                "cannot record progress for a {} job",
                self.status
            )));
        }
        if self.progress >= self.count {
            return Err(CoreError::Validation(format!(
                "progress would exceed requested count {}",
                self.count
            )));
        }
        self.progress += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `Running -> Completed`. Sets `completed_at`.
    pub fn complete(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `{Pending, Running} -> Failed`. Sets `completed_at` and the error
    /// message.
    pub fn fail(&mut self, error_msg: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error_msg = Some(error_msg.into());
        Ok(())
    }

    /// `{Pending, Running} -> Cancelled`. Sets `completed_at`.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Cancellation is only permitted before the job reaches a terminal
    /// state.
    pub fn can_be_cancelled(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Running)
    }

    // -- lease bookkeeping --------------------------------------------------

    /// Record a granted lease on the job.
    pub fn begin_lease(&mut self, worker_id: WorkerId, deadline: Timestamp) {
        self.worker_id = Some(worker_id);
        self.lease_expires_at = Some(deadline);
        self.updated_at = Utc::now();
    }

    /// Drop any lease bookkeeping (on terminal resolution or reclaim).
    pub fn clear_lease(&mut self) {
        self.worker_id = None;
        self.lease_expires_at = None;
        self.updated_at = Utc::now();
    }

    /// Push the lease deadline forward (a progress report counts as a sign
    /// of life from the leased worker).
    pub fn extend_lease(&mut self, deadline: Timestamp) {
        if self.lease_expires_at.is_some() {
            self.lease_expires_at = Some(deadline);
        }
    }

    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Consume one retry and drop the abandoned lease.
    pub fn consume_retry(&mut self) {
        self.retry_count += 1;
        self.clear_lease();
    }

    // -- derived values (computed on read, never stored) --------------------

    /// Progress percentage in `0.0..=100.0`. Zero when `count` is zero.
    pub fn progress_percent(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.progress as f64 / self.count as f64) * 100.0
    }

    /// Share of completed units that succeeded. Zero when nothing has
    /// completed yet.
    pub fn success_rate(&self) -> f64 {
        let total = self.successful + self.failed;
        if total == 0 {
            return 0.0;
        }
        (self.successful as f64 / total as f64) * 100.0
    }

    /// Elapsed execution time: `completed_at` (or now, while running) minus
    /// `started_at`. Zero if the job never started.
    pub fn duration(&self) -> chrono::Duration {
        let Some(started) = self.started_at else {
            return chrono::Duration::zero();
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        end - started
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
