use std::time::Duration;

use foreman_core::worker::HEARTBEAT_INTERVAL_SECS;

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Worker-link endpoint, e.g. `ws://host:3000/api/v1/ws/workers`.
    pub server_ws_url: String,
    /// This worker's identity. Auto-generated when not configured.
    pub worker_id: String,
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
}

impl AgentConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                                |
    /// |---------------------------|----------------------------------------|
    /// | `SERVER_WS_URL`           | `ws://localhost:3000/api/v1/ws/workers`|
    /// | `WORKER_ID`               | `worker-<8 hex chars>`                 |
    /// | `HEARTBEAT_INTERVAL_SECS` | `30`                                   |
    pub fn from_env() -> Self {
        let server_ws_url = std::env::var("SERVER_WS_URL")
            .unwrap_or_else(|_| "ws://localhost:3000/api/v1/ws/workers".into());

        let worker_id =
            std::env::var("WORKER_ID").unwrap_or_else(|_| Self::generate_worker_id());

        let heartbeat_secs: u64 = std::env::var("HEARTBEAT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(HEARTBEAT_INTERVAL_SECS);

        Self {
            server_ws_url,
            worker_id,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        }
    }

    /// `worker-` plus the first 8 hex chars of a fresh UUID.
    pub fn generate_worker_id() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("worker-{}", &id[..8])
    }
}
