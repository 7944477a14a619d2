//! Durable email job queue on Postgres.
//!
//! Jobs move `pending → sending → {sent | pending (retry) | dead}`. Workers
//! claim with `FOR UPDATE SKIP LOCKED`, so any number of them can poll the same
//! table without ever holding the same row. Every state-changing mark is
//! fenced on `status = 'sending'`: a worker whose claim was recovered as stale
//! cannot overwrite the outcome of the worker that re-claimed the job.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use postbox_common::error::AppError;
use postbox_common::types::{EmailCategory, EmailJob, JobStatus, normalize_email};

use crate::backoff::BackoffPolicy;
use crate::pagination::{Cursor, Page, page_size};

/// Default number of attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 6;

/// Upper bound accepted for a caller-supplied `max_attempts`.
pub const MAX_ALLOWED_ATTEMPTS: i32 = 50;

/// Longest `last_error` kept on a job.
pub const MAX_ERROR_CHARS: usize = 1000;

/// Input for [`JobQueue::enqueue`].
#[derive(Debug, Clone, Deserialize)]
pub struct EmailJobRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub to: String,
    #[serde(default = "default_category")]
    pub category: EmailCategory,
    pub template: String,
    pub subject: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

fn default_category() -> EmailCategory {
    EmailCategory::Transactional
}

impl EmailJobRequest {
    pub fn new(
        to: impl Into<String>,
        category: EmailCategory,
        template: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            user_id: None,
            to: to.into(),
            category,
            template: template.into(),
            subject: subject.into(),
            payload: serde_json::Value::Null,
            headers: BTreeMap::new(),
            idempotency_key: None,
            run_at: None,
            max_attempts: None,
        }
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Attach RFC 8058 one-click unsubscribe headers.
    pub fn with_unsubscribe(mut self, url: &str) -> Self {
        self.headers
            .insert("List-Unsubscribe".to_string(), format!("<{}>", url));
        self.headers.insert(
            "List-Unsubscribe-Post".to_string(),
            "List-Unsubscribe=One-Click".to_string(),
        );
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let to = self.to.trim();
        if to.is_empty() {
            return Err(AppError::Validation("Recipient is required".to_string()));
        }
        if !to.contains('@') {
            return Err(AppError::Validation(format!(
                "Recipient '{}' is not an email address",
                to
            )));
        }
        if self.subject.trim().is_empty() {
            return Err(AppError::Validation("Subject is required".to_string()));
        }
        if self.template.trim().is_empty() {
            return Err(AppError::Validation("Template is required".to_string()));
        }
        if let Some(max) = self.max_attempts {
            if !(1..=MAX_ALLOWED_ATTEMPTS).contains(&max) {
                return Err(AppError::Validation(format!(
                    "max_attempts must be between 1 and {}",
                    MAX_ALLOWED_ATTEMPTS
                )));
            }
        }
        if self
            .idempotency_key
            .as_deref()
            .is_some_and(|k| k.trim().is_empty())
        {
            return Err(AppError::Validation(
                "idempotency_key must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Filters for the admin job listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub template: Option<String>,
    pub recipient: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub sending: i64,
    pub sent: i64,
    pub dead: i64,
}

/// Truncate an error message to [`MAX_ERROR_CHARS`] characters.
pub fn truncate_error(error: &str) -> String {
    match error.char_indices().nth(MAX_ERROR_CHARS) {
        Some((idx, _)) => error[..idx].to_string(),
        None => error.to_string(),
    }
}

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    backoff: BackoffPolicy,
}

impl JobQueue {
    pub fn new(pool: PgPool, backoff: BackoffPolicy) -> Self {
        Self { pool, backoff }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Insert a job. With an idempotency key, a repeat call returns the id of
    /// the job created by the first call instead of inserting a second one.
    pub async fn enqueue(&self, request: &EmailJobRequest) -> Result<Uuid, AppError> {
        request.validate()?;

        let payload = match &request.payload {
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        let run_at = request.run_at.unwrap_or_else(Utc::now);
        let max_attempts = request.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);

        // The existing row can be deleted by an admin between our conflicting
        // insert and the lookup; one more insert settles that race.
        for _ in 0..2 {
            let inserted: Option<Uuid> = sqlx::query_scalar(
                r#"
                INSERT INTO email_jobs
                    (id, user_id, recipient, category, template, subject, payload, headers,
                     idempotency_key, max_attempts, run_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (idempotency_key) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(request.user_id)
            .bind(normalize_email(&request.to))
            .bind(request.category.to_string())
            .bind(request.template.trim())
            .bind(request.subject.trim())
            .bind(&payload)
            .bind(Json(&request.headers))
            .bind(request.idempotency_key.as_deref())
            .bind(max_attempts)
            .bind(run_at)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(id) = inserted {
                tracing::info!(
                    job_id = %id,
                    template = %request.template,
                    category = %request.category,
                    "Email job enqueued"
                );
                return Ok(id);
            }

            let existing: Option<Uuid> =
                sqlx::query_scalar("SELECT id FROM email_jobs WHERE idempotency_key = $1")
                    .bind(request.idempotency_key.as_deref())
                    .fetch_optional(&self.pool)
                    .await?;

            if let Some(id) = existing {
                tracing::debug!(job_id = %id, "Idempotent enqueue matched existing job");
                return Ok(id);
            }
        }

        Err(AppError::Conflict(
            "Job with this idempotency key is being modified concurrently".to_string(),
        ))
    }

    /// Atomically claim up to `limit` due jobs, earliest `run_at` first.
    pub async fn claim(&self, limit: i64) -> Result<Vec<EmailJob>, AppError> {
        self.claim_due(limit, Utc::now()).await
    }

    /// [`claim`](Self::claim) with an explicit clock.
    pub async fn claim_due(&self, limit: i64, now: DateTime<Utc>) -> Result<Vec<EmailJob>, AppError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let mut jobs: Vec<EmailJob> = sqlx::query_as(
            r#"
            WITH due AS (
                SELECT id FROM email_jobs
                WHERE status = 'pending' AND run_at <= $2
                ORDER BY run_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE email_jobs j
            SET status = 'sending', locked_at = $2, updated_at = NOW()
            FROM due
            WHERE j.id = due.id
            RETURNING j.*
            "#,
        )
        .bind(limit)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        // UPDATE ... RETURNING does not preserve the CTE ordering.
        jobs.sort_by_key(|job| job.run_at);

        if !jobs.is_empty() {
            tracing::debug!(count = jobs.len(), "Claimed email jobs");
        }

        Ok(jobs)
    }

    /// Mark a claimed job sent. Repeating the call on a sent job is a no-op.
    pub async fn mark_sent(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'sent',
                sent_at = COALESCE(sent_at, NOW()),
                last_error = CASE WHEN status = 'sent' THEN last_error ELSE NULL END,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('sending', 'sent')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a claimed job sent without delivering it, keeping why in `last_error`.
    pub async fn mark_suppressed(&self, job_id: Uuid, reason: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'sent', sent_at = NOW(), last_error = $2, locked_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(job_id)
        .bind(truncate_error(reason))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed attempt and reschedule with backoff.
    ///
    /// If this attempt exhausts the budget the job goes to `dead` instead, so
    /// `attempts <= max_attempts` holds whatever the caller decided. Returns the
    /// updated job, or `None` if the job was no longer `sending`.
    pub async fn mark_retry(
        &self,
        job: &EmailJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmailJob>, AppError> {
        let run_at = self.backoff.next_run_at(job.attempts, now);

        let updated: Option<EmailJob> = sqlx::query_as(
            r#"
            UPDATE email_jobs
            SET attempts = LEAST(attempts + 1, max_attempts),
                status = CASE WHEN attempts + 1 >= max_attempts THEN 'dead' ELSE 'pending' END,
                run_at = $2,
                last_error = $3,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(run_at)
        .bind(truncate_error(error))
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    /// Dead-letter a claimed job. It is never claimed again.
    pub async fn mark_dead(&self, job_id: Uuid, error: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'dead',
                attempts = LEAST(attempts + 1, max_attempts),
                last_error = $2,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(job_id)
        .bind(truncate_error(error))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Return jobs stuck in `sending` (worker crashed mid-send) to `pending`.
    /// The interrupted attempt is not counted.
    pub async fn requeue_stale(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'pending', locked_at = NULL, updated_at = NOW()
            WHERE status = 'sending' AND locked_at < $1
            "#,
        )
        .bind(now - older_than)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count, "Requeued stale email jobs");
        }
        Ok(count)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<EmailJob, AppError> {
        sqlx::query_as("SELECT * FROM email_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Email job {} not found", job_id)))
    }

    /// Newest-first listing with keyset pagination.
    pub async fn list(&self, filter: &JobFilter) -> Result<Page<EmailJob>, AppError> {
        let limit = page_size(filter.limit);
        let cursor = filter.cursor.as_deref().map(Cursor::decode).transpose()?;
        let cursor_id = cursor
            .as_ref()
            .map(|c| {
                Uuid::parse_str(&c.key)
                    .map_err(|_| AppError::Validation(format!("Invalid cursor '{}'", c.encode())))
            })
            .transpose()?;

        let rows: Vec<EmailJob> = sqlx::query_as(
            r#"
            SELECT * FROM email_jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR template = $2)
              AND ($3::text IS NULL OR recipient = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at < $5)
              AND ($6::timestamptz IS NULL OR (created_at, id) < ($6, $7::uuid))
            ORDER BY created_at DESC, id DESC
            LIMIT $8
            "#,
        )
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.template.as_deref())
        .bind(filter.recipient.as_deref().map(normalize_email))
        .bind(filter.from)
        .bind(filter.to)
        .bind(cursor.as_ref().map(|c| c.created_at))
        .bind(cursor_id)
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::from_overfetch(rows, limit, |job| {
            Cursor::new(job.created_at, job.id.to_string())
        }))
    }

    /// Reset a dead or pending job so it runs now with a fresh attempt budget.
    pub async fn retry(&self, job_id: Uuid) -> Result<EmailJob, AppError> {
        let updated: Option<EmailJob> = sqlx::query_as(
            r#"
            UPDATE email_jobs
            SET status = 'pending', attempts = 0, run_at = NOW(), last_error = NULL,
                locked_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status IN ('dead', 'pending')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(job) => {
                tracing::info!(job_id = %job_id, "Email job reset for retry");
                Ok(job)
            }
            None => {
                let current = self.get(job_id).await?;
                Err(AppError::Conflict(format!(
                    "Email job {} is {} and cannot be retried",
                    job_id, current.status
                )))
            }
        }
    }

    /// Delete a job that is not currently being sent.
    pub async fn delete(&self, job_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM email_jobs WHERE id = $1 AND status <> 'sending'")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            // Distinguish "missing" from "in flight".
            self.get(job_id).await?;
            return Err(AppError::Conflict(format!(
                "Email job {} is being sent and cannot be deleted",
                job_id
            )));
        }

        tracing::info!(job_id = %job_id, "Email job deleted");
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats, AppError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM email_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => stats.pending = count,
                "sending" => stats.sending = count,
                "sent" => stats.sent = count,
                "dead" => stats.dead = count,
                other => tracing::warn!(status = other, "Unknown email job status"),
            }
        }
        Ok(stats)
    }
}
