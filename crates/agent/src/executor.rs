//! Pluggable work-unit execution.
//!
//! The agent is a harness: what a work unit actually *does* is supplied by
//! a [`UnitExecutor`] implementation. The server only ever sees the unit
//! outcomes flowing back as progress reports.

use std::time::Duration;

use async_trait::async_trait;
use foreman_core::types::JobId;

/// A work order received from the server.
#[derive(Debug, Clone)]
pub struct WorkOrder {
    pub job_id: JobId,
    pub count: u32,
    /// When set, implementations must avoid externally visible side
    /// effects.
    pub test_mode: bool,
}

/// Executes one work unit at a time.
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    /// Execute unit `unit` (0-based) of `order`. Returns whether the unit
    /// succeeded.
    async fn execute_unit(&self, order: &WorkOrder, unit: u32) -> bool;
}

/// Executor that sleeps per unit and succeeds on a fixed pattern.
///
/// Stands in for a real executor in local runs and tests; with
/// `fail_every: Some(n)` every n-th unit fails, which exercises the
/// mixed-outcome reporting path.
pub struct SimulatedExecutor {
    pub unit_duration: Duration,
    pub fail_every: Option<u32>,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self {
            unit_duration: Duration::from_millis(100),
            fail_every: None,
        }
    }
}

#[async_trait]
impl UnitExecutor for SimulatedExecutor {
    async fn execute_unit(&self, order: &WorkOrder, unit: u32) -> bool {
        tokio::time::sleep(self.unit_duration).await;
        let success = match self.fail_every {
            Some(n) if n > 0 => (unit + 1) % n != 0,
            _ => true,
        };
        tracing::debug!(
            job_id = %order.job_id,
            unit,
            success,
            test_mode = order.test_mode,
            "Simulated unit finished",
        );
        success
    }
}
