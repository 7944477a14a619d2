use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// Lower-case and trim an email address so lookups are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Lifecycle state of a queued send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Sending,
    Sent,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Sending => "sending",
            JobStatus::Sent => "sent",
            JobStatus::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marketing jobs are consent- and suppression-checked; transactional jobs are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmailCategory {
    Transactional,
    Marketing,
}

impl std::fmt::Display for EmailCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmailCategory::Transactional => write!(f, "transactional"),
            EmailCategory::Marketing => write!(f, "marketing"),
        }
    }
}

/// One durable, retryable unit of "send this email".
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailJob {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub recipient: String,
    pub category: EmailCategory,
    pub template: String,
    pub subject: String,
    pub payload: serde_json::Value,
    pub headers: Json<BTreeMap<String, String>>,
    pub idempotency_key: Option<String>,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kinds of triggered (business-event) notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmailEventType {
    Welcome,
    LowCredit,
    PaymentFailed,
    TopupReceipt,
}

impl EmailEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailEventType::Welcome => "welcome",
            EmailEventType::LowCredit => "low_credit",
            EmailEventType::PaymentFailed => "payment_failed",
            EmailEventType::TopupReceipt => "topup_receipt",
        }
    }
}

impl std::fmt::Display for EmailEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only idempotency record for a triggered notification.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: EmailEventType,
    pub dedupe_key: String,
    pub stripe_object_id: Option<String>,
    pub language: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Why an address is permanently blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    HardBounce,
    SpamComplaint,
    ProviderUnsub,
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuppressionReason::HardBounce => write!(f, "hard_bounce"),
            SuppressionReason::SpamComplaint => write!(f, "spam_complaint"),
            SuppressionReason::ProviderUnsub => write!(f, "provider_unsub"),
        }
    }
}

/// Canonical suppression event, produced by the webhook decoders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionEvent {
    pub email: String,
    pub user_id: Option<Uuid>,
    pub reason: SuppressionReason,
    /// Provider that reported the event (e.g. "resend").
    pub source: String,
    /// Raw provider payload, kept for audit.
    pub details: serde_json::Value,
}

/// Permanent, address-level block record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SuppressionEntry {
    pub email: String,
    pub user_id: Option<Uuid>,
    pub reason: SuppressionReason,
    pub source: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Per-user marketing consent state.
///
/// `opt_in_at` / `opt_in_source` record the most recent false→true edge and
/// survive an opt-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketingConsent {
    pub user_id: Uuid,
    pub opt_in: bool,
    pub opt_in_at: Option<DateTime<Utc>>,
    pub opt_in_source: Option<String>,
    pub opt_out_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MarketingConsent {
    /// Consent for a user we have never recorded anything about.
    pub fn unknown(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            opt_in: false,
            opt_in_at: None,
            opt_in_source: None,
            opt_out_at: None,
            updated_at: now,
        }
    }

    /// Apply a consent change.
    ///
    /// Audit fields only move on an actual edge: repeating the current state
    /// returns the record unchanged.
    pub fn apply(&self, opt_in: bool, source: Option<&str>, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        match (self.opt_in, opt_in) {
            (false, true) => {
                next.opt_in = true;
                next.opt_in_at = Some(now);
                next.opt_in_source = source.map(str::to_string);
                next.updated_at = now;
            }
            (true, false) => {
                next.opt_in = false;
                next.opt_out_at = Some(now);
                next.updated_at = now;
            }
            _ => {}
        }
        next
    }
}
