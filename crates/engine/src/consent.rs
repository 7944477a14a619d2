//! Per-user marketing consent.
//!
//! Consent is the user's choice; suppression is a fact about the address.
//! Marketing mail needs both: an opt-in and an unblocked address.

use chrono::{SubsecRound, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use postbox_common::error::AppError;
use postbox_common::types::{MarketingConsent, SuppressionReason};

use crate::suppression::SuppressionRegistry;

/// Outcome of the marketing gate for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum MarketingDecision {
    Allowed,
    NoConsent,
    Suppressed(SuppressionReason),
}

impl MarketingDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, MarketingDecision::Allowed)
    }

    /// Recorded in `last_error` when a job is skipped.
    pub fn skip_reason(&self) -> Option<String> {
        match self {
            MarketingDecision::Allowed => None,
            MarketingDecision::NoConsent => Some("suppressed: no consent".to_string()),
            MarketingDecision::Suppressed(reason) => Some(format!("suppressed: {}", reason)),
        }
    }
}

#[derive(Clone)]
pub struct ConsentService {
    pool: PgPool,
    suppressions: SuppressionRegistry,
}

impl ConsentService {
    pub fn new(pool: PgPool, suppressions: SuppressionRegistry) -> Self {
        Self { pool, suppressions }
    }

    /// Current consent; users we know nothing about are opted out.
    pub async fn get(&self, user_id: Uuid) -> Result<MarketingConsent, AppError> {
        let consent: Option<MarketingConsent> =
            sqlx::query_as("SELECT * FROM marketing_consent WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(consent.unwrap_or_else(|| MarketingConsent::unknown(user_id, Utc::now())))
    }

    /// Change consent. The row is locked for the read-modify-write so two
    /// concurrent changes cannot both see the old state.
    pub async fn set_consent(
        &self,
        user_id: Uuid,
        opt_in: bool,
        source: Option<&str>,
    ) -> Result<MarketingConsent, AppError> {
        // timestamptz keeps microseconds; the returned row must match a later read.
        let now = Utc::now().trunc_subsecs(6);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO marketing_consent (user_id, opt_in, updated_at)
            VALUES ($1, false, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let current: MarketingConsent =
            sqlx::query_as("SELECT * FROM marketing_consent WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        let next = current.apply(opt_in, source, now);
        if next != current {
            sqlx::query(
                r#"
                UPDATE marketing_consent
                SET opt_in = $2, opt_in_at = $3, opt_in_source = $4, opt_out_at = $5, updated_at = $6
                WHERE user_id = $1
                "#,
            )
            .bind(user_id)
            .bind(next.opt_in)
            .bind(next.opt_in_at)
            .bind(&next.opt_in_source)
            .bind(next.opt_out_at)
            .bind(next.updated_at)
            .execute(&mut *tx)
            .await?;

            tracing::info!(
                user_id = %user_id,
                opt_in = next.opt_in,
                source = source.unwrap_or("unknown"),
                "Marketing consent changed"
            );
        }

        tx.commit().await?;
        Ok(next)
    }

    pub async fn check_marketing(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<MarketingDecision, AppError> {
        // Suppression wins over any consent state.
        if let Some(reason) = self.suppressions.reason_for(email).await? {
            return Ok(MarketingDecision::Suppressed(reason));
        }
        if !self.get(user_id).await?.opt_in {
            return Ok(MarketingDecision::NoConsent);
        }
        Ok(MarketingDecision::Allowed)
    }

    pub async fn can_send_marketing(&self, user_id: Uuid, email: &str) -> Result<bool, AppError> {
        Ok(self.check_marketing(user_id, email).await?.is_allowed())
    }
}
