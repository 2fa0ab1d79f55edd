pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                 observer notification channel (WebSocket)
/// /ws/workers         worker link (WebSocket)
///
/// /jobs               submit (POST), list (GET)
/// /jobs/stats         aggregate counts per status
/// /jobs/{id}          get one job
/// /jobs/{id}/cancel   cancel (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::observer_ws_handler))
        .route("/ws/workers", get(ws::worker_ws_handler))
        .route(
            "/jobs",
            post(handlers::jobs::submit_job).get(handlers::jobs::list_jobs),
        )
        .route("/jobs/stats", get(handlers::jobs::job_stats))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/jobs/{id}/cancel", post(handlers::jobs::cancel_job))
}
