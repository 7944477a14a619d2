//! Inbound provider webhooks.
//!
//! Providers retry anything that is not a 2xx, so once the secret checks out
//! every body gets a 200: malformed payloads are logged and count as zero
//! processed events.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;

use postbox_common::error::AppError;
use postbox_decoders::{WebhookSource, decode};

use crate::middleware::webhook::WebhookAuth;
use crate::state::AppState;

/// Largest webhook body accepted (SendGrid batches can be sizeable).
pub const WEBHOOK_BODY_LIMIT: usize = 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/webhooks/resend", post(resend_webhook))
        .route("/api/webhooks/sendgrid", post(sendgrid_webhook))
        .layer(RequestBodyLimitLayer::new(WEBHOOK_BODY_LIMIT))
}

/// POST /api/webhooks/resend
async fn resend_webhook(
    State(state): State<AppState>,
    _auth: WebhookAuth,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    handle(&state, WebhookSource::Resend, &body).await
}

/// POST /api/webhooks/sendgrid
async fn sendgrid_webhook(
    State(state): State<AppState>,
    _auth: WebhookAuth,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    handle(&state, WebhookSource::SendGrid, &body).await
}

async fn handle(
    state: &AppState,
    source: WebhookSource,
    body: &[u8],
) -> Result<Json<serde_json::Value>, AppError> {
    let events = match decode(source, body) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(source = %source, error = %e, "Ignoring malformed webhook payload");
            return Ok(Json(json!({ "processed": 0 })));
        }
    };

    let inserted = state.suppressions.record_all(&events).await?;
    tracing::info!(
        source = %source,
        events = events.len(),
        inserted,
        "Webhook processed"
    );

    Ok(Json(json!({ "processed": events.len() })))
}
