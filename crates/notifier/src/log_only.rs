//! Log-only provider for local development.

use async_trait::async_trait;

use crate::{EmailProvider, OutboundEmail, ProviderError};

/// Writes each message to the log instead of sending it.
#[derive(Debug, Default)]
pub struct LogProvider;

impl LogProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailProvider for LogProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            html_len = email.html.len(),
            has_text = email.text.is_some(),
            headers = ?email.headers.keys().collect::<Vec<_>>(),
            "Email (log provider, not sent)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_provider_always_succeeds() {
        let provider = LogProvider::new();
        let email = OutboundEmail::new("a@x.com", "Hello", "<p>Hello</p>");
        assert!(provider.send(&email).await.is_ok());
        assert_eq!(provider.name(), "log");
    }
}
