use postbox_common::types::{SuppressionEvent, SuppressionReason, normalize_email};
use serde::Deserialize;
use serde_json::Value;

use crate::{DecodeError, WebhookSource, parse_user_id};

/// One entry of a SendGrid Event Webhook batch.
#[derive(Debug, Clone, Deserialize)]
pub struct SendGridEvent {
    pub email: String,
    pub event: String,
    /// For `bounce` events: `bounce` (hard) or `blocked` (soft).
    #[serde(rename = "type", default)]
    pub bounce_type: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub sg_event_id: Option<String>,
    #[serde(skip)]
    pub raw: Value,
}

impl SendGridEvent {
    /// Parse a batch. SendGrid always posts an array; a bare object is accepted
    /// as a batch of one. Entries that do not match the event shape are skipped
    /// so one odd entry cannot drop the whole batch.
    pub fn batch_from_value(value: Value) -> Result<Vec<Self>, DecodeError> {
        let items = match value {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            _ => {
                return Err(DecodeError::UnexpectedShape(
                    "SendGrid webhook body must be a JSON array".to_string(),
                ));
            }
        };

        let events = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<SendGridEvent>(item.clone()) {
                Ok(mut event) => {
                    event.raw = item;
                    Some(event)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed SendGrid event");
                    None
                }
            })
            .collect();

        Ok(events)
    }

    fn reason(&self) -> Option<SuppressionReason> {
        match self.event.as_str() {
            "bounce" => {
                let blocked = self
                    .bounce_type
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case("blocked"));
                (!blocked).then_some(SuppressionReason::HardBounce)
            }
            "spamreport" => Some(SuppressionReason::SpamComplaint),
            "unsubscribe" | "group_unsubscribe" => Some(SuppressionReason::ProviderUnsub),
            _ => None,
        }
    }

    pub fn to_suppression(&self) -> Option<SuppressionEvent> {
        let reason = self.reason()?;
        let email = normalize_email(&self.email);
        if email.is_empty() {
            return None;
        }

        Some(SuppressionEvent {
            email,
            // Custom args are flattened into the event object.
            user_id: parse_user_id(self.raw.get("user_id")),
            reason,
            source: WebhookSource::SendGrid.to_string(),
            details: self.raw.clone(),
        })
    }
}
