//! Delivery providers.
//!
//! A provider performs the network send for one fully rendered email. The
//! process picks one at startup (`EMAIL_PROVIDER`) and hands it to the worker
//! and trigger layer as an `Arc<dyn EmailProvider>`.

pub mod log_only;
pub mod memory;
pub mod resend;
pub mod sendgrid;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use postbox_common::config::{AppConfig, ProviderKind};
use thiserror::Error;

pub use log_only::LogProvider;
pub use memory::MemoryProvider;
pub use resend::ResendProvider;
pub use sendgrid::SendGridProvider;

/// A rendered email ready for the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    /// Protocol headers attached verbatim (e.g. `List-Unsubscribe`).
    pub headers: BTreeMap<String, String>,
    /// Metadata echoed back by provider webhooks (e.g. `user_id`).
    pub tags: BTreeMap<String, String>,
}

impl OutboundEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html: html.into(),
            text: None,
            headers: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Worth retrying later (network trouble, 5xx, rate limiting).
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// The provider rejected this message; retrying will not help.
    #[error("Permanent provider error: {0}")]
    Permanent(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProviderError::Permanent(_))
    }

    /// Classify a non-success HTTP response.
    ///
    /// 429 and 5xx are transient. Auth failures are transient too: they are
    /// fixed by the operator, after which the retried job goes through. Every
    /// other 4xx means the message itself was refused.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let msg = format!("{} {}", status.as_u16(), body.trim());
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
            || status.is_server_error()
        {
            ProviderError::Transient(msg)
        } else if status.is_client_error() {
            ProviderError::Permanent(msg)
        } else {
            ProviderError::Transient(msg)
        }
    }
}

/// Trait for email delivery providers.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Perform the network send.
    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError>;

    /// Provider name, for logs.
    fn name(&self) -> &'static str;
}

/// Build the provider selected by configuration.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn EmailProvider>, ProviderError> {
    let provider: Arc<dyn EmailProvider> = match config.email_provider {
        ProviderKind::Log => Arc::new(LogProvider::new()),
        ProviderKind::Resend => {
            let key = config
                .resend_api_key
                .clone()
                .ok_or_else(|| ProviderError::Config("RESEND_API_KEY is not set".to_string()))?;
            Arc::new(ResendProvider::new(key, config.email_from.clone()))
        }
        ProviderKind::Sendgrid => {
            let key = config
                .sendgrid_api_key
                .clone()
                .ok_or_else(|| ProviderError::Config("SENDGRID_API_KEY is not set".to_string()))?;
            Arc::new(SendGridProvider::new(key, &config.email_from))
        }
    };

    tracing::info!(provider = provider.name(), "Email provider selected");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(!ProviderError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "").is_permanent());
        assert!(!ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_permanent());
        assert!(!ProviderError::from_status(StatusCode::UNAUTHORIZED, "").is_permanent());
        assert!(ProviderError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "bad to").is_permanent());
        assert!(ProviderError::from_status(StatusCode::BAD_REQUEST, "").is_permanent());
    }

    #[test]
    fn test_status_message_includes_body() {
        let err = ProviderError::from_status(StatusCode::BAD_REQUEST, " invalid address \n");
        assert_eq!(err.to_string(), "Permanent provider error: 400 invalid address");
    }

    #[test]
    fn test_outbound_builder() {
        let email = OutboundEmail::new("a@x.com", "Hi", "<p>Hi</p>")
            .with_text("Hi")
            .with_tag("user_id", "u1");
        assert_eq!(email.text.as_deref(), Some("Hi"));
        assert_eq!(email.tags.get("user_id").map(String::as_str), Some("u1"));
        assert!(email.headers.is_empty());
    }
}
