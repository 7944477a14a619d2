//! Shared-secret authentication for inbound provider webhooks.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use postbox_common::error::AppError;

use crate::state::AppState;

/// Header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Marker extractor: present only when the request carried the right secret.
#[derive(Debug, Clone, Copy)]
pub struct WebhookAuth;

impl FromRequestParts<AppState> for WebhookAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if !constant_time_eq(provided.as_bytes(), state.config.webhook_secret.as_bytes()) {
            tracing::warn!(path = %parts.uri.path(), "Rejected webhook with bad secret");
            return Err(AppError::Auth("Invalid webhook secret".to_string()));
        }

        Ok(WebhookAuth)
    }
}

/// Compare without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }
}
