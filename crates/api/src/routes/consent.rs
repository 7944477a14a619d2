//! Operator consent routes.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use postbox_common::error::AppError;
use postbox_common::types::MarketingConsent;

use crate::middleware::auth::AdminUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/admin/consent/{user_id}", get(get_consent).put(set_consent))
}

#[derive(Debug, Deserialize)]
struct SetConsentParams {
    opt_in: bool,
    #[serde(default)]
    source: Option<String>,
}

async fn get_consent(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<MarketingConsent>, AppError> {
    Ok(Json(state.consent.get(user_id).await?))
}

/// PUT /api/admin/consent/:user_id
///
/// `{"opt_in": bool, "source": "..."}`
async fn set_consent(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<Uuid>,
    Json(params): Json<SetConsentParams>,
) -> Result<Json<MarketingConsent>, AppError> {
    let source = params.source.as_deref().unwrap_or("admin");
    let consent = state
        .consent
        .set_consent(user_id, params.opt_in, Some(source))
        .await?;
    Ok(Json(consent))
}
