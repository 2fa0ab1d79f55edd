//! The dispatch engine.
//!
//! - [`queue`] -- priority-ordered work queue holding references to jobs
//!   awaiting assignment.
//! - [`registry`] -- registered workers, their heartbeats, and leases.
//! - [`service`] -- submission, cancellation, and worker report handling.
//! - [`dispatcher`] -- the control loop matching queued jobs to idle
//!   workers and reclaiming abandoned leases.

pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod service;

pub use dispatcher::{CycleOutcome, DispatcherConfig, JobDispatcher};
pub use queue::{QueueEntry, WorkQueue};
pub use registry::{WorkerRegistry, WorkerSnapshot};
pub use service::{JobService, JobStats};
