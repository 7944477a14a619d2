//! Resend HTTP API provider.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::{EmailProvider, OutboundEmail, ProviderError};

const RESEND_API_URL: &str = "https://api.resend.com";

pub struct ResendProvider {
    api_key: String,
    from: String,
    base_url: String,
    client: Client,
}

impl ResendProvider {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            from: from.into(),
            base_url: RESEND_API_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Point the provider at another host (tests, regional endpoints).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request<'a>(&'a self, email: &'a OutboundEmail) -> ResendRequest<'a> {
        ResendRequest {
            from: &self.from,
            to: vec![email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: email.text.as_deref(),
            headers: (!email.headers.is_empty()).then_some(&email.headers),
            tags: email
                .tags
                .iter()
                .map(|(name, value)| ResendTag { name, value })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<ResendTag<'a>>,
}

#[derive(Debug, Serialize)]
struct ResendTag<'a> {
    name: &'a str,
    value: &'a str,
}

#[async_trait]
impl EmailProvider for ResendProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.build_request(email))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("Resend request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(to = %email.to, "Email accepted by Resend");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status, &body))
    }

    fn name(&self) -> &'static str {
        "resend"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn email() -> OutboundEmail {
        let mut headers = BTreeMap::new();
        headers.insert(
            "List-Unsubscribe".to_string(),
            "<https://studio.example/u>".to_string(),
        );
        OutboundEmail::new("a@x.com", "Welcome", "<p>Hi</p>")
            .with_text("Hi")
            .with_headers(headers)
            .with_tag("user_id", "8b0c1f7e-3a9d-4c55-9a53-0d5bb1c0f2a1")
    }

    #[test]
    fn test_request_shape() {
        let provider = ResendProvider::new("re_key", "Studio <no-reply@studio.example>");
        let email = email();
        let value = serde_json::to_value(provider.build_request(&email)).unwrap();
        assert_eq!(value["to"], serde_json::json!(["a@x.com"]));
        assert_eq!(value["from"], "Studio <no-reply@studio.example>");
        assert_eq!(value["headers"]["List-Unsubscribe"], "<https://studio.example/u>");
        assert_eq!(value["tags"][0]["name"], "user_id");
    }

    #[test]
    fn test_request_omits_empty_fields() {
        let provider = ResendProvider::new("re_key", "no-reply@studio.example");
        let email = OutboundEmail::new("a@x.com", "S", "<p>b</p>");
        let value = serde_json::to_value(provider.build_request(&email)).unwrap();
        assert!(value.get("text").is_none());
        assert!(value.get("headers").is_none());
        assert!(value.get("tags").is_none());
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_key"))
            .and(body_partial_json(serde_json::json!({"subject": "Welcome"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "abc"})))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ResendProvider::new("re_key", "no-reply@studio.example").with_base_url(server.uri());
        provider.send(&email()).await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid `to` field"))
            .mount(&server)
            .await;

        let provider = ResendProvider::new("re_key", "no-reply@studio.example").with_base_url(server.uri());
        let err = provider.send(&email()).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = ResendProvider::new("re_key", "no-reply@studio.example").with_base_url(server.uri());
        let err = provider.send(&email()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
    }
}
