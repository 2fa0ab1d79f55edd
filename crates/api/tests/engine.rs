//! Engine integration tests: submission through dispatch, leases,
//! reclamation, and worker reports, against the in-memory store with
//! channel-backed worker links.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use foreman_api::engine::{
    DispatcherConfig, JobDispatcher, JobService, WorkQueue, WorkerRegistry,
};
use foreman_core::wire::{TerminalOutcome, WorkerCommand};
use foreman_core::worker::WorkerStats;
use foreman_core::JobStatus;
use foreman_events::{EventBus, EventKind, NotificationEvent};
use foreman_store::{JobStore, MemoryJobStore, StoreError};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryJobStore>,
    queue: Arc<WorkQueue>,
    registry: Arc<WorkerRegistry>,
    bus: Arc<EventBus>,
    service: Arc<JobService>,
    dispatcher: JobDispatcher,
}

fn harness(lease_secs: i64, max_retries: u32) -> Harness {
    let store = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(WorkQueue::new());
    let registry = Arc::new(WorkerRegistry::new(chrono::Duration::seconds(90)));
    let bus = Arc::new(EventBus::default());
    let service = Arc::new(JobService::new(
        store.clone(),
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&bus),
        chrono::Duration::seconds(lease_secs),
        max_retries,
    ));
    let dispatcher = JobDispatcher::new(Arc::clone(&service), DispatcherConfig::default());
    Harness {
        store,
        queue,
        registry,
        bus,
        service,
        dispatcher,
    }
}

impl Harness {
    /// Attach a linked worker and return the receiving end of its link.
    async fn attach_worker(&self, name: &str) -> mpsc::UnboundedReceiver<WorkerCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.register_link(name, tx).await.unwrap();
        self.registry
            .heartbeat(name, WorkerStats::default())
            .await
            .unwrap();
        rx
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_creates_a_pending_job_and_queues_it() {
    let h = harness(60, 3);
    let mut events = h.bus.subscribe();

    let job = h.service.submit(5, 0, false).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.count, 5);
    assert!(h.queue.contains(job.id).await);

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::JobUpdate);
    assert_eq!(event.status, Some(JobStatus::Pending));
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatch_binds_the_job_to_an_idle_worker() {
    let h = harness(60, 3);
    let mut orders = h.attach_worker("worker-1").await;

    let job = h.service.submit(3, 0, true).await.unwrap();
    let outcome = h.dispatcher.run_cycle().await;
    assert_eq!(outcome.dispatched, 1);

    // The worker received the work order.
    match orders.recv().await.unwrap() {
        WorkerCommand::WorkOrder {
            job_id,
            count,
            test_mode,
        } => {
            assert_eq!(job_id, job.id);
            assert_eq!(count, 3);
            assert!(test_mode);
        }
    }

    // The record reflects the running lease.
    let stored = h.store.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert!(stored.started_at.is_some());
    assert_eq!(stored.worker_id.as_deref(), Some("worker-1"));
    assert!(stored.lease_expires_at.is_some());
    assert!(h.queue.is_empty().await);

    // The worker is busy now; nothing more to dispatch.
    let outcome = h.dispatcher.run_cycle().await;
    assert_eq!(outcome.dispatched, 0);
}

#[tokio::test]
async fn a_job_is_never_dispatched_twice() {
    let h = harness(60, 3);
    let mut orders_a = h.attach_worker("worker-a").await;
    let mut orders_b = h.attach_worker("worker-b").await;

    h.service.submit(1, 0, false).await.unwrap();
    h.dispatcher.run_cycle().await;
    h.dispatcher.run_cycle().await;

    let mut total = 0;
    while orders_a.try_recv().is_ok() {
        total += 1;
    }
    while orders_b.try_recv().is_ok() {
        total += 1;
    }
    assert_eq!(total, 1, "exactly one worker received the order");
}

#[tokio::test]
async fn higher_priority_jobs_dispatch_first() {
    let h = harness(60, 3);

    let background = h.service.submit(1, -10, false).await.unwrap();
    let urgent = h.service.submit(1, 10, false).await.unwrap();

    // One worker: only the urgent job can win the single slot.
    let mut orders = h.attach_worker("worker-1").await;
    h.dispatcher.run_cycle().await;

    match orders.recv().await.unwrap() {
        WorkerCommand::WorkOrder { job_id, .. } => assert_eq!(job_id, urgent.id),
    }
    assert!(h.queue.contains(background.id).await);
}

#[tokio::test]
async fn no_workers_means_nothing_dispatches() {
    let h = harness(60, 3);
    h.service.submit(1, 0, false).await.unwrap();

    let outcome = h.dispatcher.run_cycle().await;
    assert_eq!(outcome.dispatched, 0);
    assert_eq!(h.queue.len().await, 1);
}

// ---------------------------------------------------------------------------
// Progress and terminal reports
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_lifecycle_submit_dispatch_progress_complete() {
    let h = harness(60, 3);
    let mut orders = h.attach_worker("worker-1").await;

    let job = h.service.submit(1, 0, false).await.unwrap();
    h.dispatcher.run_cycle().await;
    assert!(orders.recv().await.is_some());

    // One successful unit: counters advance, status stays running.
    let after_progress = h.service.report_progress(job.id, true).await.unwrap();
    assert_eq!(after_progress.progress, 1);
    assert_eq!(after_progress.successful, 1);
    assert_eq!(after_progress.status, JobStatus::Running);

    tokio::time::sleep(Duration::from_millis(5)).await;

    // Terminal report: completed, with derived metrics.
    let done = h
        .service
        .report_terminal(job.id, TerminalOutcome::Completed, None)
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(done.success_rate(), 100.0);
    assert!(done.duration() > chrono::Duration::zero());

    // The worker is idle again.
    assert_eq!(h.registry.idle_workers().await.len(), 1);
}

#[tokio::test]
async fn worker_declared_failure_is_conclusive() {
    let h = harness(60, 3);
    let mut orders = h.attach_worker("worker-1").await;

    let job = h.service.submit(2, 0, false).await.unwrap();
    h.dispatcher.run_cycle().await;
    assert!(orders.recv().await.is_some());

    let failed = h
        .service
        .report_terminal(
            job.id,
            TerminalOutcome::Failed,
            Some("solver crashed".into()),
        )
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_msg.as_deref(), Some("solver crashed"));

    // Worker-declared failures are never requeued.
    let outcome = h.dispatcher.run_cycle().await;
    assert_eq!(outcome.reclaimed, 0);
    assert_eq!(outcome.dispatched, 0);
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn progress_on_a_pending_job_is_rejected() {
    let h = harness(60, 3);
    let job = h.service.submit(1, 0, false).await.unwrap();

    let err = h.service.report_progress(job.id, true).await.unwrap_err();
    assert_matches!(err, StoreError::Domain(_));
}

// ---------------------------------------------------------------------------
// Lease expiry and reclamation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_lease_requeues_while_budget_remains() {
    // Zero-length leases expire the moment they are granted.
    let h = harness(0, 3);
    let mut orders = h.attach_worker("worker-1").await;

    let job = h.service.submit(1, 0, false).await.unwrap();
    let first = h.dispatcher.run_cycle().await;
    assert_eq!(first.dispatched, 1);

    // Next cycle reclaims the abandoned lease and immediately re-leases.
    let second = h.dispatcher.run_cycle().await;
    assert_eq!(second.reclaimed, 1);
    assert_eq!(second.dispatched, 1);

    let stored = h.store.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.retry_count, 1);

    // The worker got the order twice.
    assert!(orders.recv().await.is_some());
    assert!(orders.recv().await.is_some());
}

#[tokio::test]
async fn exhausted_retry_budget_fails_the_job() {
    let h = harness(0, 0);
    let mut orders = h.attach_worker("worker-1").await;

    let job = h.service.submit(1, 0, false).await.unwrap();
    h.dispatcher.run_cycle().await;
    assert!(orders.recv().await.is_some());

    let outcome = h.dispatcher.run_cycle().await;
    assert_eq!(outcome.reclaimed, 1);
    assert_eq!(outcome.dispatched, 0);

    let stored = h.store.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored
        .error_msg
        .as_deref()
        .unwrap()
        .contains("lease expired"));
    assert!(stored.completed_at.is_some());

    // The worker is free again.
    assert_eq!(h.registry.idle_workers().await.len(), 1);
}

#[tokio::test]
async fn progress_reports_keep_the_lease_alive() {
    let h = harness(3600, 3);
    let mut orders = h.attach_worker("worker-1").await;

    let job = h.service.submit(2, 0, false).await.unwrap();
    h.dispatcher.run_cycle().await;
    assert!(orders.recv().await.is_some());

    // Force the lease into the past, as if the deadline had been reached.
    h.registry
        .extend_lease(job.id, Utc::now() - chrono::Duration::hours(2), chrono::Duration::zero())
        .await;
    assert_eq!(h.registry.expired_leases(Utc::now()).await.len(), 1);

    // A progress report arrives in time: the lease is renewed and the
    // next cycle reclaims nothing.
    h.service.report_progress(job.id, true).await.unwrap();
    let outcome = h.dispatcher.run_cycle().await;
    assert_eq!(outcome.reclaimed, 0);

    let stored = h.store.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_while_queued_is_never_dispatched() {
    let h = harness(60, 3);

    let job = h.service.submit(1, 0, false).await.unwrap();
    h.service.cancel(job.id).await.unwrap();

    let mut orders = h.attach_worker("worker-1").await;
    let outcome = h.dispatcher.run_cycle().await;
    assert_eq!(outcome.dispatched, 0);
    assert!(orders.try_recv().is_err());

    let stored = h.store.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn cancelling_a_running_job_frees_its_worker() {
    let h = harness(60, 3);
    let mut orders = h.attach_worker("worker-1").await;

    let job = h.service.submit(1, 0, false).await.unwrap();
    h.dispatcher.run_cycle().await;
    assert!(orders.recv().await.is_some());

    h.service.cancel(job.id).await.unwrap();
    assert_eq!(h.registry.idle_workers().await.len(), 1);

    // The worker's late terminal report lands on a cancelled job and is
    // rejected; the recorded status stands.
    let err = h
        .service
        .report_terminal(job.id, TerminalOutcome::Completed, None)
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::Domain(_));
    let stored = h.store.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn cancelling_a_terminal_job_conflicts() {
    let h = harness(60, 3);
    let mut orders = h.attach_worker("worker-1").await;

    let job = h.service.submit(1, 0, false).await.unwrap();
    h.dispatcher.run_cycle().await;
    assert!(orders.recv().await.is_some());
    h.service
        .report_terminal(job.id, TerminalOutcome::Completed, None)
        .await
        .unwrap();

    assert!(h.service.cancel(job.id).await.is_err());
}

// ---------------------------------------------------------------------------
// Stats and events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_aggregate_counts_per_status() {
    let h = harness(60, 3);

    h.service.submit(1, 0, false).await.unwrap();
    h.service.submit(1, 0, false).await.unwrap();
    let cancelled = h.service.submit(1, 0, false).await.unwrap();
    h.service.cancel(cancelled.id).await.unwrap();

    let stats = h.service.stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.running, 0);
}

#[tokio::test]
async fn every_transition_publishes_a_job_update() {
    let h = harness(60, 3);
    let mut events = h.bus.subscribe();
    let mut orders = h.attach_worker("worker-1").await;

    let job = h.service.submit(1, 0, false).await.unwrap();
    h.dispatcher.run_cycle().await;
    assert!(orders.recv().await.is_some());
    h.service.report_progress(job.id, true).await.unwrap();
    h.service
        .report_terminal(job.id, TerminalOutcome::Completed, None)
        .await
        .unwrap();

    let statuses: Vec<Option<JobStatus>> = drain_events(&mut events)
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            Some(JobStatus::Pending),
            Some(JobStatus::Running),
            Some(JobStatus::Running),
            Some(JobStatus::Completed),
        ]
    );
}

fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<NotificationEvent>,
) -> Vec<NotificationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
