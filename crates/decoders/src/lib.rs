//! Inbound provider webhook decoders.
//!
//! Each delivery-provider family posts bounce/complaint/unsubscribe events in
//! its own wire shape. Decoders turn those into the canonical
//! [`SuppressionEvent`] before anything else looks at them.

pub mod resend;
pub mod sendgrid;

#[cfg(test)]
mod decoder_tests;

use postbox_common::types::SuppressionEvent;
use thiserror::Error;
use uuid::Uuid;

/// Provider family a webhook came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookSource {
    Resend,
    SendGrid,
}

impl WebhookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookSource::Resend => "resend",
            WebhookSource::SendGrid => "sendgrid",
        }
    }
}

impl std::fmt::Display for WebhookSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unexpected payload shape: {0}")]
    UnexpectedShape(String),
}

/// A parsed webhook body, still in the provider's own vocabulary.
#[derive(Debug, Clone)]
pub enum ProviderWebhook {
    Resend(resend::ResendEvent),
    SendGrid(Vec<sendgrid::SendGridEvent>),
}

impl ProviderWebhook {
    /// Parse a raw request body for the given provider.
    pub fn parse(source: WebhookSource, body: &[u8]) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        match source {
            WebhookSource::Resend => Ok(ProviderWebhook::Resend(resend::ResendEvent::from_value(
                value,
            )?)),
            WebhookSource::SendGrid => Ok(ProviderWebhook::SendGrid(
                sendgrid::SendGridEvent::batch_from_value(value)?,
            )),
        }
    }

    /// Normalize into canonical suppression events. Events that do not block
    /// an address (deliveries, opens, soft bounces) produce nothing.
    pub fn into_suppression_events(self) -> Vec<SuppressionEvent> {
        match self {
            ProviderWebhook::Resend(event) => event.to_suppression().into_iter().collect(),
            ProviderWebhook::SendGrid(events) => events
                .iter()
                .filter_map(sendgrid::SendGridEvent::to_suppression)
                .collect(),
        }
    }
}

/// Parse and normalize a webhook body in one step.
pub fn decode(source: WebhookSource, body: &[u8]) -> Result<Vec<SuppressionEvent>, DecodeError> {
    let events = ProviderWebhook::parse(source, body)?.into_suppression_events();
    tracing::debug!(
        source = %source,
        suppressions = events.len(),
        "Decoded provider webhook"
    );
    Ok(events)
}

/// Read a user id a provider echoed back from our send metadata.
pub(crate) fn parse_user_id(value: Option<&serde_json::Value>) -> Option<Uuid> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}
