//! Handlers for the `/jobs` resource.
//!
//! Submission, lookup, listing, aggregate stats, and cancellation. The
//! actual work a job represents happens on remote workers; these handlers
//! only touch the record store and the queue via [`JobService`].

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use foreman_core::scheduling::PRIORITY_NORMAL;
use foreman_core::types::JobId;
use foreman_core::JobStatus;
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Default page size for listings.
const DEFAULT_LIST_LIMIT: usize = 50;
/// Hard cap on page size.
const MAX_LIST_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    /// Requested number of work units. Required, positive.
    #[validate(range(min = 1, message = "count must be a positive integer"))]
    pub count: u32,
    /// Higher dispatches sooner. Defaults to normal priority.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Opaque side-effect policy flag, forwarded to the worker.
    #[serde(default)]
    pub test_mode: Option<bool>,
}

/// Query parameters of `GET /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a new job. Returns 201 with the created `pending` record; the
/// dispatcher picks it up on its next cycle.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let job = state
        .service
        .submit(
            input.count,
            input.priority.unwrap_or(PRIORITY_NORMAL),
            input.test_mode.unwrap_or(false),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Get / list / stats
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.service.get(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs
///
/// List jobs, newest first. Supports optional `status`, `limit`, and
/// `offset` query parameters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let status = match &params.status {
        Some(raw) => Some(
            JobStatus::parse(raw)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let jobs = state.service.list(status, limit, offset).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/stats
///
/// Aggregate job counts per status.
pub async fn job_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let stats = state.service.stats().await?;
    Ok(Json(DataResponse { data: stats }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a pending or running job. Returns 409 once the job is in a
/// terminal state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.service.cancel(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}
