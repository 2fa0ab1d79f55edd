//! In-process event bus backed by a `tokio::sync::broadcast` channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;

use foreman_core::types::JobId;
use foreman_core::wire::{
    MSG_TYPE_ACCOUNT_CREATED, MSG_TYPE_ERROR, MSG_TYPE_JOB_UPDATE, MSG_TYPE_WORKER_STATUS,
};
use foreman_core::{Job, JobStatus};

// ---------------------------------------------------------------------------
// NotificationEvent
// ---------------------------------------------------------------------------

/// What kind of fact an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobUpdate,
    WorkerStatus,
    /// Domain-specific passthrough, forwarded untouched.
    AccountCreated,
    Error,
}

impl EventKind {
    /// Observer-channel `type` value for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::JobUpdate => MSG_TYPE_JOB_UPDATE,
            EventKind::WorkerStatus => MSG_TYPE_WORKER_STATUS,
            EventKind::AccountCreated => MSG_TYPE_ACCOUNT_CREATED,
            EventKind::Error => MSG_TYPE_ERROR,
        }
    }
}

/// An immutable fact about a state change, broadcast to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub job_id: Option<JobId>,
    pub status: Option<JobStatus>,
    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Snapshot a job's externally visible state into a `job_update` event.
    pub fn job_update(job: &Job) -> Self {
        Self {
            kind: EventKind::JobUpdate,
            job_id: Some(job.id),
            status: Some(job.status),
            payload: json!({
                "count": job.count,
                "progress": job.progress,
                "successful": job.successful,
                "failed": job.failed,
                "progress_percent": job.progress_percent(),
                "success_rate": job.success_rate(),
                "error_msg": job.error_msg,
            }),
            timestamp: Utc::now(),
        }
    }

    /// A worker came online, went stale, or disconnected.
    pub fn worker_status(worker_id: &str, healthy: bool) -> Self {
        Self {
            kind: EventKind::WorkerStatus,
            job_id: None,
            status: None,
            payload: json!({
                "worker_id": worker_id,
                "healthy": healthy,
            }),
            timestamp: Utc::now(),
        }
    }

    /// A domain record announced by a worker, forwarded untouched.
    pub fn account_created(job_id: Option<JobId>, data: serde_json::Value) -> Self {
        Self {
            kind: EventKind::AccountCreated,
            job_id,
            status: None,
            payload: data,
            timestamp: Utc::now(),
        }
    }

    /// An error fact to surface to observers.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            job_id: None,
            status: None,
            payload: json!({ "message": message.into() }),
            timestamp: Utc::now(),
        }
    }

    /// Observer-channel JSON: `{type, job_id?, status?, progress?, data,
    /// message?}`.
    pub fn to_wire_json(&self) -> serde_json::Value {
        let mut wire = json!({
            "type": self.kind.as_str(),
            "data": self.payload,
            "timestamp": self.timestamp.to_rfc3339(),
        });
        let obj = wire.as_object_mut().expect("wire envelope is an object");
        if let Some(job_id) = self.job_id {
            obj.insert("job_id".into(), json!(job_id));
        }
        if let Some(status) = self.status {
            obj.insert("status".into(), json!(status));
        }
        if let Some(progress) = self.payload.get("progress") {
            obj.insert("progress".into(), progress.clone());
        }
        if let Some(message) = self.payload.get("message") {
            obj.insert("message".into(), message.clone());
        }
        wire
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`NotificationEvent`]. Designed to
/// be shared via `Arc<EventBus>`.
pub struct EventBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Publishing with zero subscribers is a silent no-op -- nothing is
    /// buffered for future subscribers.
    pub fn publish(&self, event: NotificationEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
