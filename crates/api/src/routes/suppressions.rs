//! Operator suppression management.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::json;

use postbox_common::error::AppError;
use postbox_common::types::SuppressionEntry;
use postbox_engine::{Page, SuppressionFilter};

use crate::middleware::auth::AdminUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/suppressions", get(list_suppressions))
        .route("/api/admin/suppressions/{email}", delete(delete_suppression))
}

/// GET /api/admin/suppressions
async fn list_suppressions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<SuppressionFilter>,
) -> Result<Json<Page<SuppressionEntry>>, AppError> {
    Ok(Json(state.suppressions.list(&filter).await?))
}

/// DELETE /api/admin/suppressions/:email
///
/// Manual override; the address can be mailed again.
async fn delete_suppression(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(email): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.suppressions.delete(&email).await?;
    tracing::info!(email = %email, by = %admin.subject, "Operator removed suppression");
    Ok(Json(json!({ "deleted": true })))
}
