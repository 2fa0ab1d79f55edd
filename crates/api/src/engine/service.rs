//! Job submission and worker-report handling.
//!
//! [`JobService`] is the single write path for job records outside the
//! dispatcher: submission, cancellation, progress reports, and terminal
//! reports all go through it. Every mutation is applied through a
//! version-checked read-modify-write so concurrent writers cannot clobber
//! each other, and every externally visible change is published on the
//! notification bus.

use std::sync::Arc;

use chrono::Utc;
use foreman_core::types::JobId;
use foreman_core::wire::TerminalOutcome;
use foreman_core::{CoreError, Job, JobStatus};
use foreman_events::{EventBus, NotificationEvent};
use foreman_store::{JobStore, StoreError};
use serde::Serialize;

use super::queue::WorkQueue;
use super::registry::WorkerRegistry;

/// How many times a version-conflicted mutation is retried before giving
/// up. Conflicts are rare (two reports racing); one retry usually wins.
const MUTATE_ATTEMPTS: u32 = 3;

/// Aggregate job counts per status.
#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: Arc<WorkQueue>,
    registry: Arc<WorkerRegistry>,
    bus: Arc<EventBus>,
    lease_duration: chrono::Duration,
    max_retries: u32,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<WorkQueue>,
        registry: Arc<WorkerRegistry>,
        bus: Arc<EventBus>,
        lease_duration: chrono::Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            bus,
            lease_duration,
            max_retries,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub(crate) fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub(crate) fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub(crate) fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub(crate) fn lease_duration(&self) -> chrono::Duration {
        self.lease_duration
    }

    // -- submission ---------------------------------------------------------

    /// Create a `pending` job record and enqueue it for dispatch.
    pub async fn submit(
        &self,
        count: u32,
        priority: i32,
        test_mode: bool,
    ) -> Result<Job, StoreError> {
        let mut job = Job::new(count, priority, test_mode);
        job.max_retries = self.max_retries;
        let job = self.store.insert(job).await?;

        self.queue.enqueue(job.id, job.priority).await;
        self.bus.publish(NotificationEvent::job_update(&job));

        tracing::info!(
            job_id = %job.id,
            count = job.count,
            priority = job.priority,
            test_mode = job.test_mode,
            "Job submitted",
        );
        Ok(job)
    }

    // -- reads --------------------------------------------------------------

    pub async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.store.get(id).await
    }

    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.store.list_by_status(status, limit, offset).await
    }

    /// Aggregate counts per status.
    pub async fn stats(&self) -> Result<JobStats, StoreError> {
        let count = |status| async move {
            self.store
                .list_by_status(Some(status), usize::MAX, 0)
                .await
                .map(|jobs| jobs.len())
        };
        let pending = count(JobStatus::Pending).await?;
        let running = count(JobStatus::Running).await?;
        let completed = count(JobStatus::Completed).await?;
        let failed = count(JobStatus::Failed).await?;
        let cancelled = count(JobStatus::Cancelled).await?;
        Ok(JobStats {
            total: pending + running + completed + failed + cancelled,
            pending,
            running,
            completed,
            failed,
            cancelled,
        })
    }

    // -- cancellation -------------------------------------------------------

    /// Cancel a pending or running job. Any live lease is released; a
    /// queue entry, if present, is discarded lazily by the dispatcher.
    ///
    /// There is no cross-process cancel signal to an already-dispatched
    /// worker: its terminal report will arrive against a cancelled job and
    /// be rejected as a conflict.
    pub async fn cancel(&self, id: JobId) -> Result<Job, StoreError> {
        let job = self.mutate(id, |job| job.cancel()).await?;
        if let Some(worker_id) = self.registry.release_lease(id).await {
            tracing::info!(job_id = %id, worker_id = %worker_id, "Released lease of cancelled job");
        }
        self.bus.publish(NotificationEvent::job_update(&job));
        tracing::info!(job_id = %id, "Job cancelled");
        Ok(job)
    }

    // -- worker reports -----------------------------------------------------

    /// Record the outcome of one work unit and refresh the job's lease.
    pub async fn report_progress(&self, job_id: JobId, success: bool) -> Result<Job, StoreError> {
        let job = self.store.increment_progress(job_id, success).await?;
        self.registry
            .extend_lease(job_id, Utc::now(), self.lease_duration)
            .await;
        self.bus.publish(NotificationEvent::job_update(&job));
        tracing::debug!(
            job_id = %job_id,
            progress = job.progress,
            successful = job.successful,
            failed = job.failed,
            "Progress recorded",
        );
        Ok(job)
    }

    /// Apply a worker's terminal report and release its lease.
    ///
    /// A worker-declared failure is conclusive: it is recorded as-is and
    /// never retried (unlike lease expiry, which consumes retry budget).
    pub async fn report_terminal(
        &self,
        job_id: JobId,
        outcome: TerminalOutcome,
        error: Option<String>,
    ) -> Result<Job, StoreError> {
        let job = self
            .mutate(job_id, |job| {
                match outcome {
                    TerminalOutcome::Completed => job.complete()?,
                    TerminalOutcome::Failed => {
                        job.fail(error.clone().unwrap_or_else(|| "worker reported failure".into()))?
                    }
                }
                job.clear_lease();
                Ok(())
            })
            .await?;

        self.registry.release_lease(job_id).await;
        self.bus.publish(NotificationEvent::job_update(&job));
        tracing::info!(job_id = %job_id, status = %job.status, "Terminal report applied");
        Ok(job)
    }

    // -- internal -----------------------------------------------------------

    /// Version-checked read-modify-write with bounded retries.
    ///
    /// On a version conflict the record is re-read and the mutation
    /// re-applied; a mutation that becomes invalid after the re-read (the
    /// job moved on) surfaces its domain error instead.
    pub(crate) async fn mutate(
        &self,
        id: JobId,
        apply: impl Fn(&mut Job) -> Result<(), CoreError>,
    ) -> Result<Job, StoreError> {
        for _ in 0..MUTATE_ATTEMPTS {
            let mut job = self.store.get(id).await?;
            apply(&mut job)?;
            match self.store.update(job).await {
                Ok(stored) => return Ok(stored),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(StoreError::Domain(CoreError::Internal(format!(
            "job {id} mutation kept conflicting after {MUTATE_ATTEMPTS} attempts"
        ))))
    }
}
