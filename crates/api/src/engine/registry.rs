//! Worker registry and health tracking.
//!
//! A worker exists in the registry from its first heartbeat. Health is
//! derived, never stored: a worker is healthy iff its last heartbeat is
//! within the configured timeout. Stale workers keep their record and
//! lease -- the dispatcher reclaims the lease on its next cycle; the
//! registry itself never touches job state.

use std::collections::HashMap;

use chrono::Utc;
use foreman_core::types::{JobId, Timestamp, WorkerId};
use foreman_core::wire::WorkerCommand;
use foreman_core::worker::{validate_worker_name, WorkerStats};
use foreman_core::{CoreError, Lease};
use tokio::sync::{mpsc, RwLock};

/// Outbound half of a worker's WebSocket link.
pub type CommandSender = mpsc::UnboundedSender<WorkerCommand>;

/// Registry-internal record for one worker.
struct WorkerRecord {
    last_heartbeat: Timestamp,
    lease: Option<Lease>,
    stats: WorkerStats,
    /// Present while the worker's WebSocket link is attached.
    sender: Option<CommandSender>,
}

/// Externally visible view of a worker (for status events and admin
/// listings).
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub worker_id: WorkerId,
    pub last_heartbeat: Timestamp,
    pub healthy: bool,
    pub leased_job: Option<JobId>,
    pub stats: WorkerStats,
}

/// Tracks registered workers, their liveness, and their leases.
///
/// Explicitly owned and dependency-injected (no ambient singleton) so
/// tests can run isolated instances concurrently.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerRecord>>,
    heartbeat_timeout: chrono::Duration,
}

impl WorkerRegistry {
    pub fn new(heartbeat_timeout: chrono::Duration) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            heartbeat_timeout,
        }
    }

    /// Attach the outbound link for a worker, creating the record if this
    /// is the first contact. Returns `true` if the worker is new.
    pub async fn register_link(
        &self,
        worker_id: &str,
        sender: CommandSender,
    ) -> Result<bool, CoreError> {
        validate_worker_name(worker_id)?;
        let mut workers = self.workers.write().await;
        match workers.get_mut(worker_id) {
            Some(record) => {
                record.sender = Some(sender);
                record.last_heartbeat = Utc::now();
                Ok(false)
            }
            None => {
                workers.insert(
                    worker_id.to_string(),
                    WorkerRecord {
                        last_heartbeat: Utc::now(),
                        lease: None,
                        stats: WorkerStats::default(),
                        sender: Some(sender),
                    },
                );
                Ok(true)
            }
        }
    }

    /// Drop the outbound link (worker disconnected). The record and any
    /// lease stay; the lease is reclaimed by deadline, not by disconnect.
    pub async fn detach_link(&self, worker_id: &str) {
        if let Some(record) = self.workers.write().await.get_mut(worker_id) {
            record.sender = None;
        }
    }

    /// Refresh a worker's liveness and cumulative stats, creating the
    /// record on first contact.
    pub async fn heartbeat(&self, worker_id: &str, stats: WorkerStats) -> Result<(), CoreError> {
        validate_worker_name(worker_id)?;
        let mut workers = self.workers.write().await;
        match workers.get_mut(worker_id) {
            Some(record) => {
                record.last_heartbeat = Utc::now();
                record.stats = stats;
            }
            None => {
                workers.insert(
                    worker_id.to_string(),
                    WorkerRecord {
                        last_heartbeat: Utc::now(),
                        lease: None,
                        stats,
                        sender: None,
                    },
                );
            }
        }
        Ok(())
    }

    fn is_fresh(&self, record: &WorkerRecord, now: Timestamp) -> bool {
        now - record.last_heartbeat < self.heartbeat_timeout
    }

    /// Workers eligible for assignment: healthy, linked, and not leased.
    /// No ordering preference among them.
    pub async fn idle_workers(&self) -> Vec<WorkerId> {
        let now = Utc::now();
        self.workers
            .read()
            .await
            .iter()
            .filter(|(_, record)| {
                record.lease.is_none() && record.sender.is_some() && self.is_fresh(record, now)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Bind a job to a worker. Fails if the worker is unknown or already
    /// holds a lease -- one active lease per worker, always.
    pub async fn assign_lease(&self, worker_id: &str, lease: Lease) -> Result<(), CoreError> {
        let mut workers = self.workers.write().await;
        let record = workers
            .get_mut(worker_id)
            .ok_or_else(|| CoreError::NotFound {
                entity: "Worker",
                id: worker_id.to_string(),
            })?;
        if let Some(existing) = &record.lease {
            return Err(CoreError::Conflict(format!(
                "worker {worker_id} already holds a lease for job {}",
                existing.job_id
            )));
        }
        record.lease = Some(lease);
        Ok(())
    }

    /// Release the lease bound to `job_id`, returning the worker that held
    /// it.
    pub async fn release_lease(&self, job_id: JobId) -> Option<WorkerId> {
        let mut workers = self.workers.write().await;
        for (worker_id, record) in workers.iter_mut() {
            if record.lease.as_ref().is_some_and(|l| l.job_id == job_id) {
                record.lease = None;
                return Some(worker_id.clone());
            }
        }
        None
    }

    /// Push the deadline of the lease bound to `job_id` forward. A no-op
    /// if no such lease exists.
    pub async fn extend_lease(
        &self,
        job_id: JobId,
        now: Timestamp,
        duration: chrono::Duration,
    ) -> bool {
        let mut workers = self.workers.write().await;
        for record in workers.values_mut() {
            if let Some(lease) = &mut record.lease {
                if lease.job_id == job_id {
                    lease.extend(now, duration);
                    return true;
                }
            }
        }
        false
    }

    /// Leases whose deadline has passed as of `now`.
    pub async fn expired_leases(&self, now: Timestamp) -> Vec<Lease> {
        self.workers
            .read()
            .await
            .values()
            .filter_map(|record| record.lease.clone())
            .filter(|lease| lease.is_expired(now))
            .collect()
    }

    /// Fire-and-forget a command down a worker's link. Returns `false` if
    /// the worker has no attached link or the link is closed.
    pub async fn send_command(&self, worker_id: &str, command: WorkerCommand) -> bool {
        let workers = self.workers.read().await;
        match workers.get(worker_id).and_then(|r| r.sender.as_ref()) {
            Some(sender) => sender.send(command).is_ok(),
            None => false,
        }
    }

    /// Snapshot every worker for status reporting.
    pub async fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let now = Utc::now();
        self.workers
            .read()
            .await
            .iter()
            .map(|(worker_id, record)| WorkerSnapshot {
                worker_id: worker_id.clone(),
                last_heartbeat: record.last_heartbeat,
                healthy: self.is_fresh(record, now),
                leased_job: record.lease.as_ref().map(|l| l.job_id),
                stats: record.stats,
            })
            .collect()
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Duration::seconds(90))
    }

    fn channel() -> (CommandSender, mpsc::UnboundedReceiver<WorkerCommand>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn first_heartbeat_creates_the_record() {
        let registry = registry();
        registry
            .heartbeat("worker-1", WorkerStats::default())
            .await
            .unwrap();
        assert_eq!(registry.worker_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_worker_name_is_rejected() {
        let registry = registry();
        assert!(registry
            .heartbeat("not a name", WorkerStats::default())
            .await
            .is_err());
        assert_eq!(registry.worker_count().await, 0);
    }

    #[tokio::test]
    async fn heartbeat_updates_stats() {
        let registry = registry();
        let mut stats = WorkerStats::default();
        registry.heartbeat("worker-1", stats).await.unwrap();

        stats.record(true);
        registry.heartbeat("worker-1", stats).await.unwrap();

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].stats.jobs_succeeded, 1);
    }

    #[tokio::test]
    async fn stale_workers_are_not_idle() {
        // Timeout of zero makes every worker immediately stale.
        let registry = WorkerRegistry::new(Duration::zero());
        let (tx, _rx) = channel();
        registry.register_link("worker-1", tx).await.unwrap();

        assert!(registry.idle_workers().await.is_empty());
        assert!(!registry.snapshot().await[0].healthy);
    }

    #[tokio::test]
    async fn unlinked_workers_are_not_idle() {
        let registry = registry();
        registry
            .heartbeat("worker-1", WorkerStats::default())
            .await
            .unwrap();
        assert!(registry.idle_workers().await.is_empty());
    }

    #[tokio::test]
    async fn linked_fresh_worker_is_idle_until_leased() {
        let registry = registry();
        let (tx, _rx) = channel();
        registry.register_link("worker-1", tx).await.unwrap();
        assert_eq!(registry.idle_workers().await, vec!["worker-1".to_string()]);

        let lease = Lease::grant(
            Uuid::new_v4(),
            "worker-1".into(),
            Utc::now(),
            Duration::seconds(60),
        );
        registry.assign_lease("worker-1", lease).await.unwrap();
        assert!(registry.idle_workers().await.is_empty());
    }

    #[tokio::test]
    async fn one_lease_per_worker() {
        let registry = registry();
        let (tx, _rx) = channel();
        registry.register_link("worker-1", tx).await.unwrap();

        let lease = |job| Lease::grant(job, "worker-1".into(), Utc::now(), Duration::seconds(60));
        registry
            .assign_lease("worker-1", lease(Uuid::new_v4()))
            .await
            .unwrap();
        let err = registry
            .assign_lease("worker-1", lease(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn release_lease_by_job_id() {
        let registry = registry();
        let (tx, _rx) = channel();
        registry.register_link("worker-1", tx).await.unwrap();

        let job_id = Uuid::new_v4();
        let lease = Lease::grant(job_id, "worker-1".into(), Utc::now(), Duration::seconds(60));
        registry.assign_lease("worker-1", lease).await.unwrap();

        assert_eq!(
            registry.release_lease(job_id).await,
            Some("worker-1".to_string())
        );
        assert!(registry.release_lease(job_id).await.is_none());
        assert_eq!(registry.idle_workers().await.len(), 1);
    }

    #[tokio::test]
    async fn expired_leases_are_reported() {
        let registry = registry();
        let (tx, _rx) = channel();
        registry.register_link("worker-1", tx).await.unwrap();

        let job_id = Uuid::new_v4();
        let lease = Lease::grant(job_id, "worker-1".into(), Utc::now(), Duration::zero());
        registry.assign_lease("worker-1", lease).await.unwrap();

        let expired = registry.expired_leases(Utc::now()).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].job_id, job_id);
    }

    #[tokio::test]
    async fn extend_lease_defers_expiry() {
        let registry = registry();
        let (tx, _rx) = channel();
        registry.register_link("worker-1", tx).await.unwrap();

        let job_id = Uuid::new_v4();
        let now = Utc::now();
        let lease = Lease::grant(job_id, "worker-1".into(), now, Duration::zero());
        registry.assign_lease("worker-1", lease).await.unwrap();

        assert!(registry
            .extend_lease(job_id, now, Duration::seconds(60))
            .await);
        assert!(registry.expired_leases(now).await.is_empty());
    }

    #[tokio::test]
    async fn send_command_requires_an_attached_link() {
        let registry = registry();
        let (tx, mut rx) = channel();
        registry.register_link("worker-1", tx).await.unwrap();

        let delivered = registry
            .send_command(
                "worker-1",
                WorkerCommand::WorkOrder {
                    job_id: Uuid::new_v4(),
                    count: 1,
                    test_mode: false,
                },
            )
            .await;
        assert!(delivered);
        assert!(matches!(
            rx.recv().await,
            Some(WorkerCommand::WorkOrder { count: 1, .. })
        ));

        registry.detach_link("worker-1").await;
        let delivered = registry
            .send_command(
                "worker-1",
                WorkerCommand::WorkOrder {
                    job_id: Uuid::new_v4(),
                    count: 1,
                    test_mode: false,
                },
            )
            .await;
        assert!(!delivered);
    }
}
