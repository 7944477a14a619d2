use postbox_common::types::{SuppressionEvent, SuppressionReason, normalize_email};
use serde::Deserialize;
use serde_json::Value;

use crate::{DecodeError, WebhookSource, parse_user_id};

/// Resend webhook event (one event per request).
#[derive(Debug, Clone, Deserialize)]
pub struct ResendEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: ResendEventData,
    /// Raw body, kept verbatim for the suppression audit trail.
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResendEventData {
    #[serde(default)]
    pub email_id: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default)]
    pub bounce: Option<ResendBounce>,
    /// Either `{"user_id": "..."}` or `[{"name": "user_id", "value": "..."}]`.
    #[serde(default)]
    pub tags: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResendBounce {
    #[serde(rename = "type", default)]
    pub bounce_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ResendEvent {
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        if !value.is_object() {
            return Err(DecodeError::UnexpectedShape(
                "Resend webhook body must be a JSON object".to_string(),
            ));
        }
        let mut event: ResendEvent = serde_json::from_value(value.clone())?;
        event.raw = value;
        Ok(event)
    }

    fn reason(&self) -> Option<SuppressionReason> {
        match self.event_type.as_str() {
            "email.bounced" => {
                let transient = self
                    .data
                    .bounce
                    .as_ref()
                    .and_then(|b| b.bounce_type.as_deref())
                    .is_some_and(|t| t.eq_ignore_ascii_case("transient"));
                (!transient).then_some(SuppressionReason::HardBounce)
            }
            "email.complained" => Some(SuppressionReason::SpamComplaint),
            _ => None,
        }
    }

    fn user_id(&self) -> Option<uuid::Uuid> {
        match self.data.tags.as_ref()? {
            Value::Object(map) => parse_user_id(map.get("user_id")),
            Value::Array(items) => items
                .iter()
                .find(|tag| tag.get("name").and_then(Value::as_str) == Some("user_id"))
                .and_then(|tag| parse_user_id(tag.get("value"))),
            _ => None,
        }
    }

    /// Canonical suppression for this event, if it blocks the address.
    ///
    /// Resend reports one recipient per event; only the first `to` address is used.
    pub fn to_suppression(&self) -> Option<SuppressionEvent> {
        let reason = self.reason()?;
        let email = self
            .data
            .to
            .first()
            .map(|e| normalize_email(e))
            .filter(|e| !e.is_empty())?;

        Some(SuppressionEvent {
            email,
            user_id: self.user_id(),
            reason,
            source: WebhookSource::Resend.to_string(),
            details: self.raw.clone(),
        })
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
