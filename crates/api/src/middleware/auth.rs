//! Operator authentication.
//!
//! Admin routes take an `AdminUser` extractor, which validates an
//! `Authorization: Bearer <JWT>` header signed with `ADMIN_JWT_SECRET` and
//! requires the `admin` role claim.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use postbox_common::error::AppError;

use crate::state::AppState;

/// Role required on every operator endpoint.
pub const ADMIN_ROLE: &str = "admin";

/// JWT claims stored in the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Operator or service identity, for logs.
    pub sub: String,
    pub role: String,
    /// Expiration time (UNIX timestamp)
    pub exp: i64,
    /// Issued at (UNIX timestamp)
    pub iat: i64,
}

/// Authenticated operator extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub subject: String,
    pub claims: Claims,
}

/// Encode an operator token. Used by ops tooling and tests.
pub fn encode_jwt(subject: &str, role: &str, secret: &str, expiry_hours: u64) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now
        .checked_add_signed(Duration::hours(expiry_hours.min(u64::from(u32::MAX)) as i64))
        .ok_or_else(|| AppError::Auth("Token expiry out of range".to_string()))?;

    let claims = Claims {
        sub: subject.to_string(),
        role: role.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Auth(format!("Failed to encode JWT: {}", e)))
}

/// Decode and validate a JWT token.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let secret = state.config.admin_jwt_secret.clone();

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        async move {
            let token = auth_header
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
                .ok_or_else(|| {
                    AppError::Auth("Missing or invalid Authorization header. Use 'Bearer <JWT>'".to_string())
                })?;

            let claims = decode_jwt(token.trim(), &secret)?;
            if claims.role != ADMIN_ROLE {
                tracing::warn!(subject = %claims.sub, role = %claims.role, "Rejected non-admin token");
                return Err(AppError::Auth("Admin role required".to_string()));
            }

            Ok(AdminUser {
                subject: claims.sub.clone(),
                claims,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret-key-for-unit-tests";

    #[test]
    fn test_encode_decode_jwt() {
        let token = encode_jwt("ops@studio", ADMIN_ROLE, TEST_SECRET, 24).unwrap();
        let claims = decode_jwt(&token, TEST_SECRET).unwrap();
        assert_eq!(claims.sub, "ops@studio");
        assert_eq!(claims.role, ADMIN_ROLE);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn test_invalid_secret_rejected() {
        let token = encode_jwt("ops@studio", ADMIN_ROLE, TEST_SECRET, 24).unwrap();
        assert!(decode_jwt(&token, "wrong-secret").is_err());
    }

    #[test]
    fn test_expired_jwt_rejected() {
        let now = Utc::now();
        let claims = Claims {
            sub: "ops@studio".to_string(),
            role: ADMIN_ROLE.to_string(),
            exp: (now - Duration::hours(1)).timestamp(),
            iat: (now - Duration::hours(2)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap();

        assert!(decode_jwt(&token, TEST_SECRET).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            decode_jwt("not.a.valid.jwt", TEST_SECRET),
            Err(AppError::Auth(_))
        ));
    }
}
