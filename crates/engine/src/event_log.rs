//! Idempotent event log for triggered notifications.
//!
//! Each business event has a dedupe key; the `email_events.dedupe_key` unique
//! index turns "did we already handle this?" into a single insert. Recording
//! happens before delivery, so a concurrent duplicate loses the insert race
//! and never renders or sends.

use std::fmt::Display;
use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use postbox_common::error::AppError;
use postbox_common::types::{EmailEvent, EmailEventType};

/// Identity of one triggered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKey {
    /// At most once per user, ever.
    Welcome { user_id: Uuid },
    /// At most once per user per UTC calendar day.
    LowCredit { user_id: Uuid, day: NaiveDate },
    /// At most once per user per failed billing object.
    PaymentFailed { user_id: Uuid, stripe_object_id: String },
    /// At most once per billing object, whoever it belongs to.
    TopupReceipt { user_id: Uuid, stripe_object_id: String },
}

impl EventKey {
    pub fn low_credit(user_id: Uuid, at: DateTime<Utc>) -> Self {
        EventKey::LowCredit {
            user_id,
            day: at.date_naive(),
        }
    }

    pub fn event_type(&self) -> EmailEventType {
        match self {
            EventKey::Welcome { .. } => EmailEventType::Welcome,
            EventKey::LowCredit { .. } => EmailEventType::LowCredit,
            EventKey::PaymentFailed { .. } => EmailEventType::PaymentFailed,
            EventKey::TopupReceipt { .. } => EmailEventType::TopupReceipt,
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            EventKey::Welcome { user_id }
            | EventKey::LowCredit { user_id, .. }
            | EventKey::PaymentFailed { user_id, .. }
            | EventKey::TopupReceipt { user_id, .. } => *user_id,
        }
    }

    pub fn stripe_object_id(&self) -> Option<&str> {
        match self {
            EventKey::PaymentFailed { stripe_object_id, .. }
            | EventKey::TopupReceipt { stripe_object_id, .. } => Some(stripe_object_id),
            _ => None,
        }
    }

    pub fn dedupe_key(&self) -> String {
        match self {
            EventKey::Welcome { user_id } => format!("welcome:{}", user_id),
            EventKey::LowCredit { user_id, day } => {
                format!("low_credit:{}:{}", user_id, day.format("%Y-%m-%d"))
            }
            EventKey::PaymentFailed {
                user_id,
                stripe_object_id,
            } => format!("payment_failed:{}:{}", user_id, stripe_object_id),
            EventKey::TopupReceipt {
                stripe_object_id, ..
            } => format!("topup_receipt:{}", stripe_object_id),
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        match self.stripe_object_id() {
            Some(id) if id.trim().is_empty() => Err(AppError::Validation(format!(
                "{} requires a billing object id",
                self.event_type()
            ))),
            _ => Ok(()),
        }
    }
}

/// Result of [`EventLog::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    AlreadyHandled,
}

/// Result of [`EventLog::send_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOnceOutcome {
    /// First occurrence; delivery succeeded.
    Delivered,
    /// First occurrence; delivery failed. The event stays recorded.
    DeliveryFailed(String),
    /// A previous call already handled this event.
    AlreadyHandled,
}

#[derive(Clone)]
pub struct EventLog {
    pool: PgPool,
}

impl EventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the event row. Exactly one concurrent caller gets `Inserted`.
    pub async fn record(
        &self,
        key: &EventKey,
        language: &str,
        payload: &serde_json::Value,
    ) -> Result<RecordOutcome, AppError> {
        key.validate()?;

        let inserted: Option<EmailEvent> = sqlx::query_as(
            r#"
            INSERT INTO email_events (id, user_id, event_type, dedupe_key, stripe_object_id, language, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (dedupe_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key.user_id())
        .bind(key.event_type().to_string())
        .bind(key.dedupe_key())
        .bind(key.stripe_object_id())
        .bind(language)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await?;

        let Some(event) = inserted else {
            return Ok(RecordOutcome::AlreadyHandled);
        };
        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            dedupe_key = %event.dedupe_key,
            "Notification event recorded"
        );
        Ok(RecordOutcome::Inserted)
    }

    /// Record the event and, only if it is new, run `deliver`.
    ///
    /// A delivery failure is logged and reported but the event row is kept:
    /// a triggered notification is attempted at most once.
    pub async fn send_once<F, Fut, E>(
        &self,
        key: &EventKey,
        language: &str,
        payload: &serde_json::Value,
        deliver: F,
    ) -> Result<SendOnceOutcome, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        if self.record(key, language, payload).await? == RecordOutcome::AlreadyHandled {
            tracing::debug!(
                dedupe_key = %key.dedupe_key(),
                "Notification already handled, skipping"
            );
            return Ok(SendOnceOutcome::AlreadyHandled);
        }

        match deliver().await {
            Ok(()) => {
                tracing::info!(
                    user_id = %key.user_id(),
                    event_type = %key.event_type(),
                    "Notification delivered"
                );
                Ok(SendOnceOutcome::Delivered)
            }
            Err(e) => {
                tracing::error!(
                    user_id = %key.user_id(),
                    event_type = %key.event_type(),
                    error = %e,
                    "Notification delivery failed"
                );
                Ok(SendOnceOutcome::DeliveryFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user() -> Uuid {
        Uuid::parse_str("0b3e5a9c-2f4d-4c1a-8e7b-6d5c4b3a2910").unwrap()
    }

    #[test]
    fn test_dedupe_keys() {
        let u = user();
        assert_eq!(
            EventKey::Welcome { user_id: u }.dedupe_key(),
            format!("welcome:{}", u)
        );
        assert_eq!(
            EventKey::PaymentFailed {
                user_id: u,
                stripe_object_id: "in_123".into()
            }
            .dedupe_key(),
            format!("payment_failed:{}:in_123", u)
        );
        assert_eq!(
            EventKey::TopupReceipt {
                user_id: u,
                stripe_object_id: "pi_9".into()
            }
            .dedupe_key(),
            "topup_receipt:pi_9"
        );
    }

    #[test]
    fn test_low_credit_keys_on_utc_day() {
        let u = user();
        let morning = Utc.with_ymd_and_hms(2026, 5, 1, 0, 5, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2026, 5, 1, 23, 55, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2026, 5, 2, 0, 0, 1).unwrap();

        let a = EventKey::low_credit(u, morning).dedupe_key();
        let b = EventKey::low_credit(u, night).dedupe_key();
        let c = EventKey::low_credit(u, next).dedupe_key();

        assert_eq!(a, format!("low_credit:{}:2026-05-01", u));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_topup_receipt_key_ignores_user() {
        let a = EventKey::TopupReceipt {
            user_id: Uuid::new_v4(),
            stripe_object_id: "pi_1".into(),
        };
        let b = EventKey::TopupReceipt {
            user_id: Uuid::new_v4(),
            stripe_object_id: "pi_1".into(),
        };
        assert_eq!(a.dedupe_key(), b.dedupe_key());
    }

    #[test]
    fn test_blank_billing_object_rejected() {
        let key = EventKey::PaymentFailed {
            user_id: user(),
            stripe_object_id: "  ".into(),
        };
        assert!(matches!(key.validate(), Err(AppError::Validation(_))));
        assert!(EventKey::Welcome { user_id: user() }.validate().is_ok());
    }

    #[test]
    fn test_event_metadata() {
        let key = EventKey::TopupReceipt {
            user_id: user(),
            stripe_object_id: "pi_1".into(),
        };
        assert_eq!(key.event_type(), EmailEventType::TopupReceipt);
        assert_eq!(key.stripe_object_id(), Some("pi_1"));
        assert_eq!(key.user_id(), user());
        assert_eq!(EventKey::Welcome { user_id: user() }.stripe_object_id(), None);
    }
}
