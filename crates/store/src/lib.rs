//! Job record store boundary.
//!
//! Persistence of job records is an external collaborator of this system;
//! the engine consumes it only through the narrow [`JobStore`] trait:
//! create/read/update by id, list by status, and atomic progress-counter
//! increments. [`MemoryJobStore`] is the reference implementation used by
//! the server default wiring and by tests.
//!
//! Concurrent writers are serialized per store call; read-modify-write
//! sequences are protected by the `version` field on
//! [`Job`](foreman_core::Job) -- [`JobStore::update`] rejects a stale
//! version with [`StoreError::VersionConflict`], and callers re-read and
//! re-apply.

mod memory;

pub use memory::MemoryJobStore;

use async_trait::async_trait;
use foreman_core::types::JobId;
use foreman_core::{CoreError, Job, JobStatus};

/// Errors surfaced by the store boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No job record exists for the given id.
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// A record with this id already exists.
    #[error("Job {0} already exists")]
    AlreadyExists(JobId),

    /// The update carried a stale version; the record changed underneath
    /// the caller.
    #[error("Job {id} version conflict: expected {expected}, found {found}")]
    VersionConflict {
        id: JobId,
        expected: i64,
        found: i64,
    },

    /// A domain rule rejected the mutation (e.g. progress on a job that is
    /// not running).
    #[error(transparent)]
    Domain(#[from] CoreError),
}

/// Narrow persistence interface for job records.
///
/// Implementations must serialize mutations of a given job so that the
/// counter invariants hold at every observed point.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    /// Insert a new record. Fails with `AlreadyExists` on id collision.
    async fn insert(&self, job: Job) -> Result<Job, StoreError>;

    /// Replace an existing record. The incoming `version` must match the
    /// stored one; the store bumps it on success and returns the stored
    /// record.
    async fn update(&self, job: Job) -> Result<Job, StoreError>;

    /// List jobs, optionally filtered by status, newest first.
    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// Atomically record the outcome of one work unit. The increment and
    /// the domain checks happen under the store's own lock, so concurrent
    /// reports for the same job never race.
    async fn increment_progress(&self, id: JobId, success: bool) -> Result<Job, StoreError>;
}
