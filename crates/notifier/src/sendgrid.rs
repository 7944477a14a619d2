//! SendGrid v3 mail-send provider.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::{EmailProvider, OutboundEmail, ProviderError};

const SENDGRID_API_URL: &str = "https://api.sendgrid.com";

pub struct SendGridProvider {
    api_key: String,
    from: Mailbox,
    base_url: String,
    client: Client,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Mailbox {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl Mailbox {
    /// Parse `Name <addr@host>` or a bare address.
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match (raw.rfind('<'), raw.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = raw[..open].trim().trim_matches('"').trim();
                Self {
                    email: raw[open + 1..close].trim().to_string(),
                    name: (!name.is_empty()).then(|| name.to_string()),
                }
            }
            _ => Self {
                email: raw.to_string(),
                name: None,
            },
        }
    }
}

impl SendGridProvider {
    pub fn new(api_key: impl Into<String>, from: &str) -> Self {
        Self {
            api_key: api_key.into(),
            from: Mailbox::parse(from),
            base_url: SENDGRID_API_URL.to_string(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request<'a>(&'a self, email: &'a OutboundEmail) -> SendGridRequest<'a> {
        // text/plain must precede text/html.
        let mut content = Vec::with_capacity(2);
        if let Some(text) = email.text.as_deref() {
            content.push(Content {
                content_type: "text/plain",
                value: text,
            });
        }
        content.push(Content {
            content_type: "text/html",
            value: &email.html,
        });

        SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![Mailbox {
                    email: email.to.clone(),
                    name: None,
                }],
                custom_args: (!email.tags.is_empty()).then_some(&email.tags),
            }],
            from: &self.from,
            subject: &email.subject,
            content,
            headers: (!email.headers.is_empty()).then_some(&email.headers),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendGridRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: &'a Mailbox,
    subject: &'a str,
    content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<&'a BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Mailbox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_args: Option<&'a BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.build_request(email))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("SendGrid request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(to = %email.to, "Email accepted by SendGrid");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status, &body))
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }
}
