//! Address-level suppression registry.
//!
//! Entries come from provider webhooks (hard bounces, complaints, provider
//! unsubscribes) and are keyed on the normalized address. The first report
//! for an address wins; later reports are ignored.

use serde::Deserialize;
use sqlx::PgPool;

use postbox_common::error::AppError;
use postbox_common::types::{SuppressionEntry, SuppressionEvent, SuppressionReason, normalize_email};

use crate::pagination::{Cursor, Page, page_size};

/// Filters for the admin suppression listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuppressionFilter {
    /// Substring match on the address.
    pub email: Option<String>,
    pub reason: Option<SuppressionReason>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Clone)]
pub struct SuppressionRegistry {
    pool: PgPool,
}

impl SuppressionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a suppression. Returns `false` if the address was already blocked.
    pub async fn record(&self, event: &SuppressionEvent) -> Result<bool, AppError> {
        let email = normalize_email(&event.email);
        if email.is_empty() {
            return Err(AppError::Validation(
                "Suppression requires an email address".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO email_suppressions (email, user_id, reason, source, details)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(&email)
        .bind(event.user_id)
        .bind(event.reason.to_string())
        .bind(&event.source)
        .bind(&event.details)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            tracing::info!(
                email = %email,
                reason = %event.reason,
                source = %event.source,
                "Address suppressed"
            );
        }
        Ok(inserted)
    }

    /// Record a batch; returns how many were new.
    pub async fn record_all(&self, events: &[SuppressionEvent]) -> Result<usize, AppError> {
        let mut inserted = 0;
        for event in events {
            if self.record(event).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    pub async fn is_blocked(&self, email: &str) -> Result<bool, AppError> {
        Ok(self.reason_for(email).await?.is_some())
    }

    pub async fn reason_for(&self, email: &str) -> Result<Option<SuppressionReason>, AppError> {
        let reason: Option<SuppressionReason> =
            sqlx::query_scalar("SELECT reason FROM email_suppressions WHERE email = $1")
                .bind(normalize_email(email))
                .fetch_optional(&self.pool)
                .await?;
        Ok(reason)
    }

    pub async fn list(&self, filter: &SuppressionFilter) -> Result<Page<SuppressionEntry>, AppError> {
        let limit = page_size(filter.limit);
        let cursor = filter.cursor.as_deref().map(Cursor::decode).transpose()?;
        let pattern = filter
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .map(|e| format!("%{}%", escape_like(&e)));

        let rows: Vec<SuppressionEntry> = sqlx::query_as(
            r#"
            SELECT * FROM email_suppressions
            WHERE ($1::text IS NULL OR email LIKE $1)
              AND ($2::text IS NULL OR reason = $2)
              AND ($3::timestamptz IS NULL OR (created_at, email) < ($3, $4::text))
            ORDER BY created_at DESC, email DESC
            LIMIT $5
            "#,
        )
        .bind(pattern)
        .bind(filter.reason.map(|r| r.to_string()))
        .bind(cursor.as_ref().map(|c| c.created_at))
        .bind(cursor.as_ref().map(|c| c.key.clone()))
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::from_overfetch(rows, limit, |entry| {
            Cursor::new(entry.created_at, entry.email.clone())
        }))
    }

    /// Remove a suppression so the address can be mailed again.
    pub async fn delete(&self, email: &str) -> Result<(), AppError> {
        let email = normalize_email(email);
        let result = sqlx::query("DELETE FROM email_suppressions WHERE email = $1")
            .bind(&email)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("No suppression for {}", email)));
        }

        tracing::info!(email = %email, "Suppression removed");
        Ok(())
    }
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a_b%c\\d"), "a\\_b\\%c\\\\d");
        assert_eq!(escape_like("plain@x.com"), "plain@x.com");
    }

    #[test]
    fn test_filter_deserialize() {
        let filter: SuppressionFilter =
            serde_json::from_value(serde_json::json!({ "reason": "spam_complaint", "limit": 10 }))
                .unwrap();
        assert_eq!(filter.reason, Some(SuppressionReason::SpamComplaint));
        assert_eq!(filter.limit, Some(10));
    }
}
