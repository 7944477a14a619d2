//! Triggered-notification endpoints for the services that own the business
//! events (signup, billing). Each call is idempotent per event.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use postbox_common::error::AppError;
use postbox_engine::{Amount, Recipient, SendOnceOutcome};

use crate::middleware::auth::AdminUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/triggers/welcome", post(welcome))
        .route("/api/triggers/low-credit", post(low_credit))
        .route("/api/triggers/payment-failed", post(payment_failed))
        .route("/api/triggers/topup-receipt", post(topup_receipt))
}

#[derive(Debug, Deserialize)]
struct LowCreditParams {
    #[serde(flatten)]
    recipient: Recipient,
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct PaymentFailedParams {
    #[serde(flatten)]
    recipient: Recipient,
    stripe_object_id: String,
    #[serde(default)]
    amount: Option<Amount>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopupReceiptParams {
    #[serde(flatten)]
    recipient: Recipient,
    stripe_object_id: String,
    amount: Amount,
    credits: i64,
}

fn outcome_body(outcome: SendOnceOutcome) -> Json<serde_json::Value> {
    Json(match outcome {
        SendOnceOutcome::Delivered => json!({ "outcome": "delivered" }),
        SendOnceOutcome::AlreadyHandled => json!({ "outcome": "already_handled" }),
        SendOnceOutcome::DeliveryFailed(error) => {
            json!({ "outcome": "delivery_failed", "error": error })
        }
    })
}

/// POST /api/triggers/welcome
async fn welcome(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(recipient): Json<Recipient>,
) -> Result<Json<serde_json::Value>, AppError> {
    Ok(outcome_body(state.triggers.welcome(&recipient).await?))
}

/// POST /api/triggers/low-credit
async fn low_credit(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(params): Json<LowCreditParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state
        .triggers
        .low_credit(&params.recipient, params.balance, Utc::now())
        .await?;
    Ok(outcome_body(outcome))
}

/// POST /api/triggers/payment-failed
async fn payment_failed(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(params): Json<PaymentFailedParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state
        .triggers
        .payment_failed(
            &params.recipient,
            &params.stripe_object_id,
            params.amount.as_ref(),
            params.reason.as_deref(),
        )
        .await?;
    Ok(outcome_body(outcome))
}

/// POST /api/triggers/topup-receipt
async fn topup_receipt(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(params): Json<TopupReceiptParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state
        .triggers
        .topup_receipt(
            &params.recipient,
            &params.stripe_object_id,
            &params.amount,
            params.credits,
        )
        .await?;
    Ok(outcome_body(outcome))
}
