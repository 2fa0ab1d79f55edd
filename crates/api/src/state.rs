use std::sync::Arc;

use foreman_events::EventBus;
use foreman_store::JobStore;

use crate::config::ServerConfig;
use crate::engine::{JobService, WorkerRegistry};
use crate::ws::ObserverHub;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheaply cloneable -- every field is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Job record store boundary.
    pub store: Arc<dyn JobStore>,
    /// Submission/cancellation/report write path.
    pub service: Arc<JobService>,
    /// Registered workers and their leases.
    pub registry: Arc<WorkerRegistry>,
    /// Observer connection fan-out.
    pub hub: Arc<ObserverHub>,
    /// Notification bus for publishing state-change events.
    pub bus: Arc<EventBus>,
}
