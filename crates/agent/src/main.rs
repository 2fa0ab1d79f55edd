//! `foreman-agent` -- worker daemon.
//!
//! Connects to the Foreman server over WebSocket, heartbeats on an
//! interval, and executes received work orders, reporting each unit's
//! outcome as it lands.
//!
//! # Environment variables
//!
//! | Variable                  | Required | Default                                 |
//! |---------------------------|----------|-----------------------------------------|
//! | `SERVER_WS_URL`           | no       | `ws://localhost:3000/api/v1/ws/workers` |
//! | `WORKER_ID`               | no       | auto-generated `worker-<hex>`           |
//! | `HEARTBEAT_INTERVAL_SECS` | no       | `30`                                    |
//! | `UNIT_DURATION_MS`        | no       | `100` (simulated executor)              |

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foreman_agent::config::AgentConfig;
use foreman_agent::executor::SimulatedExecutor;
use foreman_agent::link;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env();

    let unit_duration_ms: u64 = std::env::var("UNIT_DURATION_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);

    tracing::info!(
        worker_id = %config.worker_id,
        ws_url = %config.server_ws_url,
        heartbeat_interval_secs = config.heartbeat_interval.as_secs(),
        "Starting foreman-agent",
    );

    let executor = Arc::new(SimulatedExecutor {
        unit_duration: Duration::from_millis(unit_duration_ms),
        fail_every: None,
    });

    tokio::select! {
        _ = link::run(&config, executor) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down");
        }
    }
}
