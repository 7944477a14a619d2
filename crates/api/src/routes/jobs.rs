//! Job enqueue and operator job management routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use postbox_common::error::AppError;
use postbox_common::types::EmailJob;
use postbox_engine::{BatchReport, EmailJobRequest, JobFilter, Page, QueueStats};

use crate::middleware::auth::AdminUser;
use crate::state::AppState;

/// Largest on-demand batch an operator can trigger.
const MAX_TICK_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", post(enqueue_job))
        .route("/api/admin/jobs", get(list_jobs))
        .route("/api/admin/jobs/stats", get(job_stats))
        .route("/api/admin/jobs/tick", post(run_tick))
        .route("/api/admin/jobs/{id}", get(get_job).delete(delete_job))
        .route("/api/admin/jobs/{id}/retry", post(retry_job))
}

/// POST /api/jobs
///
/// Enqueue an email job.
async fn enqueue_job(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(request): Json<EmailJobRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let id = state.queue.enqueue(&request).await?;
    tracing::debug!(job_id = %id, by = %admin.subject, "Enqueue request handled");
    Ok((StatusCode::ACCEPTED, Json(json!({ "id": id }))))
}

/// GET /api/admin/jobs
///
/// Filtered, newest-first job listing.
async fn list_jobs(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<JobFilter>,
) -> Result<Json<Page<EmailJob>>, AppError> {
    Ok(Json(state.queue.list(&filter).await?))
}

/// GET /api/admin/jobs/stats
///
/// Job counts per status.
async fn job_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.queue.stats().await?))
}

/// GET /api/admin/jobs/:id
async fn get_job(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EmailJob>, AppError> {
    Ok(Json(state.queue.get(id).await?))
}

/// POST /api/admin/jobs/:id/retry
///
/// Reset a dead or pending job to run now.
async fn retry_job(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EmailJob>, AppError> {
    let job = state.queue.retry(id).await?;
    tracing::info!(job_id = %id, by = %admin.subject, "Operator retried email job");
    Ok(Json(job))
}

/// DELETE /api/admin/jobs/:id
async fn delete_job(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.queue.delete(id).await?;
    tracing::info!(job_id = %id, by = %admin.subject, "Operator deleted email job");
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct TickParams {
    limit: Option<i64>,
}

/// POST /api/admin/jobs/tick
///
/// Run one worker batch inline.
async fn run_tick(
    State(state): State<AppState>,
    admin: AdminUser,
    Query(params): Query<TickParams>,
) -> Result<Json<BatchReport>, AppError> {
    let limit = params
        .limit
        .unwrap_or(state.config.worker_batch_size)
        .clamp(1, MAX_TICK_LIMIT);

    let report = state.worker.run_batch(limit).await?;
    tracing::info!(by = %admin.subject, limit, processed = report.processed, "Operator ran batch tick");
    Ok(Json(report))
}
