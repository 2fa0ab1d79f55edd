//! The dispatch control loop.
//!
//! A single long-lived Tokio task. Each cycle it (1) reclaims leases whose
//! deadline passed without any report, and (2) matches queued jobs to idle
//! workers, granting a lease and firing the work order down the worker's
//! link.
//!
//! Expiry is detected by polling the lease deadlines here -- there is no
//! per-job timer and no push signal from workers, which keeps reclamation
//! logic independently testable via [`JobDispatcher::run_cycle`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use foreman_core::wire::WorkerCommand;
use foreman_core::{JobStatus, Lease};
use foreman_events::NotificationEvent;
use foreman_store::StoreError;
use tokio_util::sync::CancellationToken;

use super::service::JobService;

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often the loop wakes up.
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// What one cycle accomplished, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub reclaimed: usize,
    pub dispatched: usize,
}

/// Background job dispatcher.
pub struct JobDispatcher {
    service: Arc<JobService>,
    config: DispatcherConfig,
}

impl JobDispatcher {
    pub fn new(service: Arc<JobService>, config: DispatcherConfig) -> Self {
        Self { service, config }
    }

    /// Run the dispatch loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.run_cycle().await;
                    if outcome.reclaimed > 0 || outcome.dispatched > 0 {
                        tracing::debug!(
                            reclaimed = outcome.reclaimed,
                            dispatched = outcome.dispatched,
                            "Dispatch cycle finished",
                        );
                    }
                }
            }
        }
    }

    /// One full cycle: reclaim, then assign.
    pub async fn run_cycle(&self) -> CycleOutcome {
        CycleOutcome {
            reclaimed: self.reclaim_expired().await,
            dispatched: self.dispatch_ready().await,
        }
    }

    // -- lease reclamation ---------------------------------------------------

    /// Reclaim every lease past its deadline: requeue the job while retry
    /// budget remains, fail it once the budget is gone.
    async fn reclaim_expired(&self) -> usize {
        let now = Utc::now();
        let expired = self.service.registry().expired_leases(now).await;
        let mut reclaimed = 0;

        for lease in expired {
            self.service.registry().release_lease(lease.job_id).await;

            let job = match self.service.store().get(lease.job_id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::error!(job_id = %lease.job_id, error = %e, "Leased job vanished");
                    continue;
                }
            };
            // A terminal report can race the deadline; nothing to reclaim
            // then.
            if job.is_terminal() {
                continue;
            }

            if job.has_retry_budget() {
                let requeued = self
                    .service
                    .mutate(job.id, |job| {
                        job.consume_retry();
                        Ok(())
                    })
                    .await;
                match requeued {
                    Ok(job) => {
                        self.service.queue().enqueue(job.id, job.priority).await;
                        self.service
                            .bus()
                            .publish(NotificationEvent::job_update(&job));
                        tracing::warn!(
                            job_id = %job.id,
                            worker_id = %lease.worker_id,
                            retry_count = job.retry_count,
                            "Lease expired, job requeued",
                        );
                        reclaimed += 1;
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to requeue job");
                    }
                }
            } else {
                let attempts = job.retry_count + 1;
                let failed = self
                    .service
                    .mutate(job.id, |job| {
                        job.fail(format!(
                            "lease expired with no report from worker after {attempts} attempts"
                        ))?;
                        job.clear_lease();
                        Ok(())
                    })
                    .await;
                match failed {
                    Ok(job) => {
                        self.service
                            .bus()
                            .publish(NotificationEvent::job_update(&job));
                        tracing::error!(
                            job_id = %job.id,
                            worker_id = %lease.worker_id,
                            "Retry budget exhausted, job failed",
                        );
                        reclaimed += 1;
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to fail job");
                    }
                }
            }
        }

        reclaimed
    }

    // -- assignment ----------------------------------------------------------

    /// While idle workers and queued jobs exist, bind them.
    async fn dispatch_ready(&self) -> usize {
        let mut dispatched = 0;

        loop {
            let idle = self.service.registry().idle_workers().await;
            let Some(worker_id) = idle.into_iter().next() else {
                break;
            };
            let Some(entry) = self.service.queue().dequeue_next().await else {
                break;
            };

            let job = match self.service.store().get(entry.job_id).await {
                Ok(job) => job,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::error!(job_id = %entry.job_id, error = %e, "Queue entry lookup failed");
                    continue;
                }
            };
            // Discard entries for jobs that moved on while queued
            // (cancelled, or failed by an earlier reclaim).
            if job.is_terminal() {
                continue;
            }

            if self.dispatch_one(&worker_id, job).await {
                dispatched += 1;
            }
        }

        dispatched
    }

    /// Grant a lease on `job` to `worker_id` and send the work order.
    async fn dispatch_one(&self, worker_id: &str, job: foreman_core::Job) -> bool {
        let now = Utc::now();
        let lease = Lease::grant(
            job.id,
            worker_id.to_string(),
            now,
            self.service.lease_duration(),
        );
        let deadline = lease.deadline;

        if let Err(e) = self.service.registry().assign_lease(worker_id, lease).await {
            // Lost a race for this worker; put the entry back for the next
            // cycle.
            tracing::debug!(worker_id = %worker_id, error = %e, "Worker no longer assignable");
            self.service.queue().enqueue(job.id, job.priority).await;
            return false;
        }

        let worker = worker_id.to_string();
        let leased = self
            .service
            .mutate(job.id, move |job| {
                // A requeued job is already Running; only first dispatch
                // transitions it.
                if job.status == JobStatus::Pending {
                    job.start()?;
                }
                job.begin_lease(worker.clone(), deadline);
                Ok(())
            })
            .await;

        let job = match leased {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Job not dispatchable, dropping lease");
                self.service.registry().release_lease(job.id).await;
                return false;
            }
        };

        let order = WorkerCommand::WorkOrder {
            job_id: job.id,
            count: job.count,
            test_mode: job.test_mode,
        };
        if !self.service.registry().send_command(worker_id, order).await {
            // The link died between the idle check and the send. Undo the
            // lease and requeue without burning retry budget.
            tracing::warn!(
                job_id = %job.id,
                worker_id = %worker_id,
                "Work order send failed, requeueing",
            );
            // Detach the dead link so this worker stops looking idle.
            self.service.registry().detach_link(worker_id).await;
            self.service.registry().release_lease(job.id).await;
            let _ = self
                .service
                .mutate(job.id, |job| {
                    job.clear_lease();
                    Ok(())
                })
                .await;
            self.service.queue().enqueue(job.id, job.priority).await;
            return false;
        }

        self.service
            .bus()
            .publish(NotificationEvent::job_update(&job));
        tracing::info!(
            job_id = %job.id,
            worker_id = %worker_id,
            deadline = %deadline,
            "Job dispatched",
        );
        true
    }
}
