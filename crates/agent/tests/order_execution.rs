//! Integration tests for work-order execution and reporting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use foreman_agent::executor::{SimulatedExecutor, WorkOrder};
use foreman_agent::link::execute_order;
use foreman_core::wire::{TerminalOutcome, WorkerMessage};
use foreman_core::worker::WorkerStats;

fn instant_executor(fail_every: Option<u32>) -> Arc<SimulatedExecutor> {
    Arc::new(SimulatedExecutor {
        unit_duration: Duration::ZERO,
        fail_every,
    })
}

fn order(count: u32) -> WorkOrder {
    WorkOrder {
        job_id: Uuid::new_v4(),
        count,
        test_mode: true,
    }
}

// ---------------------------------------------------------------------------
// Test: a clean order reports one progress per unit, then a terminal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_order_reports_each_unit_then_completes() {
    let stats = Arc::new(Mutex::new(WorkerStats::default()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let order = order(3);
    let job_id = order.job_id;

    execute_order(order, instant_executor(None), Arc::clone(&stats), tx).await;

    for _ in 0..3 {
        match rx.recv().await.unwrap() {
            WorkerMessage::Progress {
                job_id: reported,
                success,
            } => {
                assert_eq!(reported, job_id);
                assert!(success);
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }
    match rx.recv().await.unwrap() {
        WorkerMessage::Terminal {
            job_id: reported,
            outcome,
            error,
        } => {
            assert_eq!(reported, job_id);
            assert_eq!(outcome, TerminalOutcome::Completed);
            assert!(error.is_none());
        }
        other => panic!("expected terminal, got {other:?}"),
    }

    let final_stats = *stats.lock().unwrap();
    assert_eq!(final_stats.jobs_processed, 1);
    assert_eq!(final_stats.jobs_succeeded, 1);
}

// ---------------------------------------------------------------------------
// Test: failed units are reported as such; the job still completes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mixed_outcomes_still_complete_the_order() {
    let stats = Arc::new(Mutex::new(WorkerStats::default()));
    let (tx, mut rx) = mpsc::unbounded_channel();

    execute_order(order(4), instant_executor(Some(2)), Arc::clone(&stats), tx).await;

    let mut outcomes = Vec::new();
    let mut terminal = None;
    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Progress { success, .. } => outcomes.push(success),
            WorkerMessage::Terminal { outcome, .. } => {
                terminal = Some(outcome);
                break;
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    assert_eq!(outcomes, vec![true, false, true, false]);
    assert_eq!(terminal, Some(TerminalOutcome::Completed));

    // A job with failed units counts against the worker's success stats.
    let final_stats = *stats.lock().unwrap();
    assert_eq!(final_stats.jobs_processed, 1);
    assert_eq!(final_stats.jobs_failed, 1);
}

// ---------------------------------------------------------------------------
// Test: a closed session aborts the order without panicking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closed_session_abandons_the_order() {
    let stats = Arc::new(Mutex::new(WorkerStats::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    execute_order(order(5), instant_executor(None), Arc::clone(&stats), tx).await;

    // Nothing was processed to completion, so lifetime stats are untouched.
    assert_eq!(stats.lock().unwrap().jobs_processed, 0);
}
