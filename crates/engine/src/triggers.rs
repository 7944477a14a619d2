//! Business-event notifications: welcome, low credit, payment failed, top-up
//! receipt.
//!
//! Each trigger goes through the event log first, so a given event produces
//! at most one email no matter how often or how concurrently it is reported.
//! Delivery is either an immediate provider send or an enqueue on the job
//! queue, chosen by configuration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use postbox_common::config::DeliveryMode;
use postbox_common::error::AppError;
use postbox_common::types::{EmailCategory, EmailEventType};
use postbox_notifier::{EmailProvider, OutboundEmail, ProviderError};

use crate::event_log::{EventKey, EventLog, SendOnceOutcome};
use crate::queue::{EmailJobRequest, JobQueue};
use crate::render::{RenderError, TemplateRenderer};

/// Who a triggered notification goes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: Uuid,
    pub email: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl Recipient {
    pub fn new(user_id: Uuid, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            language: default_language(),
            name: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// Money amount as reported by the billing provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amount {
    /// Minor units (cents).
    pub minor: i64,
    pub currency: String,
}

impl Amount {
    /// `"12.34"` for 1234 minor units.
    pub fn display(&self) -> String {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Queue(#[from] AppError),
}

#[derive(Clone)]
pub struct Triggers {
    events: EventLog,
    queue: JobQueue,
    provider: Arc<dyn EmailProvider>,
    renderer: Arc<dyn TemplateRenderer>,
    mode: DeliveryMode,
}

impl Triggers {
    pub fn new(
        events: EventLog,
        queue: JobQueue,
        provider: Arc<dyn EmailProvider>,
        renderer: Arc<dyn TemplateRenderer>,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            events,
            queue,
            provider,
            renderer,
            mode,
        }
    }

    pub async fn welcome(&self, to: &Recipient) -> Result<SendOnceOutcome, AppError> {
        let key = EventKey::Welcome { user_id: to.user_id };
        self.fire(&key, to, json!({ "name": to.name })).await
    }

    /// At most one low-credit warning per user per UTC day.
    pub async fn low_credit(
        &self,
        to: &Recipient,
        balance: i64,
        now: DateTime<Utc>,
    ) -> Result<SendOnceOutcome, AppError> {
        let key = EventKey::low_credit(to.user_id, now);
        self.fire(&key, to, json!({ "name": to.name, "balance": balance })).await
    }

    pub async fn payment_failed(
        &self,
        to: &Recipient,
        stripe_object_id: &str,
        amount: Option<&Amount>,
        reason: Option<&str>,
    ) -> Result<SendOnceOutcome, AppError> {
        let key = EventKey::PaymentFailed {
            user_id: to.user_id,
            stripe_object_id: stripe_object_id.to_string(),
        };
        let vars = json!({
            "name": to.name,
            "stripe_object_id": stripe_object_id,
            "amount": amount.map(Amount::display),
            "currency": amount.map(|a| a.currency.to_uppercase()),
            "reason": reason,
        });
        self.fire(&key, to, vars).await
    }

    pub async fn topup_receipt(
        &self,
        to: &Recipient,
        stripe_object_id: &str,
        amount: &Amount,
        credits: i64,
    ) -> Result<SendOnceOutcome, AppError> {
        let key = EventKey::TopupReceipt {
            user_id: to.user_id,
            stripe_object_id: stripe_object_id.to_string(),
        };
        let vars = json!({
            "name": to.name,
            "stripe_object_id": stripe_object_id,
            "amount": amount.display(),
            "currency": amount.currency.to_uppercase(),
            "credits": credits,
        });
        self.fire(&key, to, vars).await
    }

    async fn fire(
        &self,
        key: &EventKey,
        to: &Recipient,
        mut vars: serde_json::Value,
    ) -> Result<SendOnceOutcome, AppError> {
        if to.email.trim().is_empty() {
            return Err(AppError::Validation("Recipient email is required".to_string()));
        }
        if let Some(obj) = vars.as_object_mut() {
            obj.insert("language".to_string(), json!(to.language));
        }

        self.events
            .send_once(key, &to.language, &vars, || self.deliver(key, to, &vars))
            .await
    }

    async fn deliver(
        &self,
        key: &EventKey,
        to: &Recipient,
        vars: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let template = template_for(key.event_type());
        let rendered = self.renderer.render(template, vars)?;

        match self.mode {
            DeliveryMode::Direct => {
                let mut email = OutboundEmail::new(to.email.trim(), rendered.subject, rendered.html)
                    .with_tag("category", EmailCategory::Transactional.to_string())
                    .with_tag("template", template)
                    .with_tag("user_id", to.user_id.to_string());
                if let Some(text) = rendered.text {
                    email = email.with_text(text);
                }
                self.provider.send(&email).await?;
            }
            DeliveryMode::Queued => {
                let request = EmailJobRequest::new(
                    to.email.trim(),
                    EmailCategory::Transactional,
                    template,
                    rendered.subject,
                )
                .for_user(to.user_id)
                .with_payload(vars.clone())
                .with_idempotency_key(key.dedupe_key());
                self.queue.enqueue(&request).await?;
            }
        }
        Ok(())
    }
}

/// Template used for each kind of triggered notification.
pub fn template_for(event_type: EmailEventType) -> &'static str {
    event_type.as_str()
}
