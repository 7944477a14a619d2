//! Signed one-click unsubscribe tokens.
//!
//! Format: `<user_id>.<issued_at_unix>.<hex hmac-sha256>`, where the MAC covers
//! `<user_id>.<issued_at_unix>`. Tokens carry no state server-side; anyone
//! holding a valid token may opt that user out of marketing mail.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// How long an unsubscribe link stays valid.
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 365;

/// Tolerated clock drift for tokens that claim to come from the future.
const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed unsubscribe token")]
    Malformed,

    #[error("Invalid unsubscribe token signature")]
    BadSignature,

    #[error("Unsubscribe token has expired")]
    Expired,

    #[error("Unsubscribe secret must not be empty")]
    InvalidSecret,
}

#[derive(Clone)]
pub struct UnsubscribeTokens {
    keyed: HmacSha256,
    ttl: Duration,
}

impl UnsubscribeTokens {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, TokenError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(TokenError::InvalidSecret);
        }
        let keyed = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidSecret)?;
        Ok(Self {
            keyed,
            ttl: Duration::days(DEFAULT_TOKEN_TTL_DAYS),
        })
    }

    fn mac(&self, message: &str) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(message.as_bytes());
        mac
    }

    pub fn sign(&self, user_id: Uuid, issued_at: DateTime<Utc>) -> String {
        let message = format!("{}.{}", user_id, issued_at.timestamp());
        let signature = hex::encode(self.mac(&message).finalize().into_bytes());
        format!("{}.{}", message, signature)
    }

    /// Check the signature in constant time, then expiry. Returns the user id.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Uuid, TokenError> {
        let mut parts = token.trim().splitn(3, '.');
        let (Some(user), Some(issued), Some(signature)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let user_id = Uuid::parse_str(user).map_err(|_| TokenError::Malformed)?;
        let issued_secs: i64 = issued.parse().map_err(|_| TokenError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

        self.mac(&format!("{}.{}", user, issued))
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let issued_at = DateTime::from_timestamp(issued_secs, 0).ok_or(TokenError::Malformed)?;
        if issued_at > now + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            return Err(TokenError::Malformed);
        }
        if now - issued_at > self.ttl {
            return Err(TokenError::Expired);
        }

        Ok(user_id)
    }

    /// Public unsubscribe URL for a user.
    pub fn link(&self, base_url: &str, user_id: Uuid, now: DateTime<Utc>) -> String {
        format!(
            "{}/api/unsubscribe?token={}",
            base_url.trim_end_matches('/'),
            self.sign(user_id, now)
        )
    }

    /// `List-Unsubscribe` headers for a marketing email.
    pub fn headers(&self, base_url: &str, user_id: Uuid, now: DateTime<Utc>) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "List-Unsubscribe".to_string(),
                format!("<{}>", self.link(base_url, user_id, now)),
            ),
            (
                "List-Unsubscribe-Post".to_string(),
                "List-Unsubscribe=One-Click".to_string(),
            ),
        ])
    }
}
