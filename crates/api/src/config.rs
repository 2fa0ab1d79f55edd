use foreman_core::scheduling::{
    DEFAULT_DISPATCH_INTERVAL_MS, DEFAULT_LEASE_DURATION_SECS, DEFAULT_MAX_RETRIES,
};
use foreman_core::worker::HEARTBEAT_TIMEOUT_SECS;

/// How long an observer connection may stay silent before the server
/// disconnects it. Client keepalives (every 30 s) defend against this.
pub const DEFAULT_OBSERVER_IDLE_TIMEOUT_SECS: u64 = 120;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Dispatcher poll interval in milliseconds.
    pub dispatch_interval_ms: u64,
    /// Lease duration granted per dispatch, in seconds.
    pub lease_duration_secs: u64,
    /// Lease-reclaim retry budget per job.
    pub max_retries: u32,
    /// Seconds without a heartbeat before a worker is considered stale.
    pub heartbeat_timeout_secs: u64,
    /// Seconds without inbound traffic before an observer is disconnected.
    pub observer_idle_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `HOST`                       | `0.0.0.0`               |
    /// | `PORT`                       | `3000`                  |
    /// | `CORS_ORIGINS`               | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`       | `30`                    |
    /// | `DISPATCH_INTERVAL_MS`       | `1000`                  |
    /// | `LEASE_DURATION_SECS`        | `60`                    |
    /// | `MAX_RETRIES`                | `3`                     |
    /// | `HEARTBEAT_TIMEOUT_SECS`     | `90`                    |
    /// | `OBSERVER_IDLE_TIMEOUT_SECS` | `120`                   |
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parsed("PORT", 3000),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            request_timeout_secs: env_parsed("REQUEST_TIMEOUT_SECS", 30),
            dispatch_interval_ms: env_parsed("DISPATCH_INTERVAL_MS", DEFAULT_DISPATCH_INTERVAL_MS),
            lease_duration_secs: env_parsed("LEASE_DURATION_SECS", DEFAULT_LEASE_DURATION_SECS),
            max_retries: env_parsed("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            heartbeat_timeout_secs: env_parsed("HEARTBEAT_TIMEOUT_SECS", HEARTBEAT_TIMEOUT_SECS),
            observer_idle_timeout_secs: env_parsed(
                "OBSERVER_IDLE_TIMEOUT_SECS",
                DEFAULT_OBSERVER_IDLE_TIMEOUT_SECS,
            ),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be valid: {e}")),
        Err(_) => default,
    }
}
