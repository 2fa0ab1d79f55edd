use std::sync::Arc;
use std::time::Duration;

use crate::ws::manager::ObserverHub;

/// Interval between server-side pings to observers (in seconds).
const PING_INTERVAL_SECS: u64 = 30;

/// Spawn a background task that pings all observer connections and culls
/// the ones that have gone silent past the hub's idle timeout.
///
/// The returned `JoinHandle` is aborted during shutdown.
pub fn start_observer_heartbeat(hub: Arc<ObserverHub>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));

        loop {
            interval.tick().await;
            let count = hub.connection_count().await;
            tracing::debug!(count, "Observer heartbeat ping");
            hub.ping_all().await;

            let culled = hub.prune_idle().await;
            if !culled.is_empty() {
                tracing::info!(count = culled.len(), "Culled idle observers");
            }
        }
    })
}
