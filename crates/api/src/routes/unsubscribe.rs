//! Public unsubscribe endpoints.
//!
//! `GET` serves the link in the email body; `POST` is the RFC 8058 one-click
//! request mail clients send from the `List-Unsubscribe` header. Both opt the
//! token's user out of marketing mail.

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use postbox_common::error::AppError;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/unsubscribe", get(unsubscribe_page).post(one_click_unsubscribe))
}

#[derive(Debug, Deserialize)]
struct UnsubscribeParams {
    token: String,
}

async fn opt_out(state: &AppState, token: &str, source: &str) -> Result<Uuid, AppError> {
    let user_id = state
        .tokens
        .verify(token, Utc::now())
        .map_err(|e| AppError::Validation(e.to_string()))?;

    state.consent.set_consent(user_id, false, Some(source)).await?;
    tracing::info!(user_id = %user_id, source, "User unsubscribed from marketing email");
    Ok(user_id)
}

/// GET /api/unsubscribe?token=...
async fn unsubscribe_page(
    State(state): State<AppState>,
    Query(params): Query<UnsubscribeParams>,
) -> Result<Html<&'static str>, AppError> {
    opt_out(&state, &params.token, "unsubscribe_link").await?;
    Ok(Html(
        "<!DOCTYPE html><html><body><h1>You have been unsubscribed</h1>\
         <p>You will no longer receive marketing email from us. \
         Account and billing notifications are not affected.</p></body></html>",
    ))
}

/// POST /api/unsubscribe?token=... (one-click)
async fn one_click_unsubscribe(
    State(state): State<AppState>,
    Query(params): Query<UnsubscribeParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    opt_out(&state, &params.token, "one_click").await?;
    Ok(Json(json!({ "unsubscribed": true })))
}
