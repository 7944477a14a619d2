//! Queue worker: claims due jobs and drives each to its next state.
//!
//! Per job:
//! 1. Marketing jobs pass the consent and suppression gate, or are marked
//!    sent without delivery
//! 2. The template is rendered
//! 3. The provider sends it
//! 4. The job is marked sent, rescheduled with backoff, or dead-lettered
//!
//! A failure on one job never stops the rest of the batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use postbox_common::error::AppError;
use postbox_common::types::{EmailCategory, EmailJob};
use postbox_notifier::{EmailProvider, OutboundEmail, ProviderError};

use crate::consent::{ConsentService, MarketingDecision};
use crate::queue::JobQueue;
use crate::render::TemplateRenderer;
use crate::unsubscribe::UnsubscribeTokens;

/// Aggregate result of one [`Worker::run_batch`] call.
///
/// Suppressed marketing jobs count as `sent`; `suppressed` breaks them out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub retried: usize,
    pub dead: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Sent => self.sent += 1,
            JobOutcome::Suppressed => {
                self.sent += 1;
                self.suppressed += 1;
            }
            JobOutcome::Retried => self.retried += 1,
            JobOutcome::Dead => self.dead += 1,
            JobOutcome::Lost => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Sent,
    Suppressed,
    Retried,
    Dead,
    /// The job left `sending` under us (stale recovery); another worker owns it.
    Lost,
}

/// What to do with a job whose send failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry,
    Dead,
}

/// Permanent errors and exhausted budgets dead-letter; everything else retries.
pub fn failure_disposition(job: &EmailJob, permanent: bool) -> FailureDisposition {
    if permanent || job.attempts + 1 >= job.max_attempts {
        FailureDisposition::Dead
    } else {
        FailureDisposition::Retry
    }
}

/// Adds `List-Unsubscribe` headers to marketing jobs that were enqueued without them.
#[derive(Clone)]
pub struct UnsubscribeLinks {
    pub tokens: UnsubscribeTokens,
    pub base_url: String,
}

#[derive(Clone)]
pub struct Worker {
    queue: JobQueue,
    consent: ConsentService,
    provider: Arc<dyn EmailProvider>,
    renderer: Arc<dyn TemplateRenderer>,
    unsubscribe: Option<UnsubscribeLinks>,
}

impl Worker {
    pub fn new(
        queue: JobQueue,
        consent: ConsentService,
        provider: Arc<dyn EmailProvider>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            queue,
            consent,
            provider,
            renderer,
            unsubscribe: None,
        }
    }

    pub fn with_unsubscribe_links(mut self, links: UnsubscribeLinks) -> Self {
        self.unsubscribe = Some(links);
        self
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Claim up to `limit` due jobs and process them sequentially.
    pub async fn run_batch(&self, limit: i64) -> Result<BatchReport, AppError> {
        self.run_batch_at(limit, Utc::now()).await
    }

    /// [`run_batch`](Self::run_batch) with an explicit clock.
    pub async fn run_batch_at(&self, limit: i64, now: DateTime<Utc>) -> Result<BatchReport, AppError> {
        let jobs = self.queue.claim_due(limit, now).await?;
        let mut report = BatchReport::default();

        for job in &jobs {
            report.processed += 1;
            match self.process(job, now).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    // Left in `sending`; stale recovery returns it to the queue.
                    tracing::error!(job_id = %job.id, error = %e, "Failed to process email job");
                }
            }
        }

        if report.processed > 0 {
            tracing::info!(
                processed = report.processed,
                sent = report.sent,
                suppressed = report.suppressed,
                retried = report.retried,
                dead = report.dead,
                "Email batch complete"
            );
        }

        Ok(report)
    }

    async fn process(&self, job: &EmailJob, now: DateTime<Utc>) -> Result<JobOutcome, AppError> {
        if job.category == EmailCategory::Marketing {
            let Some(user_id) = job.user_id else {
                return self
                    .dead(job, "marketing email requires a user for consent checks")
                    .await;
            };

            let decision = self.consent.check_marketing(user_id, &job.recipient).await?;
            if let Some(reason) = decision.skip_reason() {
                tracing::info!(job_id = %job.id, reason = %reason, "Marketing email suppressed");
                return Ok(if self.queue.mark_suppressed(job.id, &reason).await? {
                    JobOutcome::Suppressed
                } else {
                    JobOutcome::Lost
                });
            }
            debug_assert_eq!(decision, MarketingDecision::Allowed);
        }

        let rendered = match self.renderer.render(&job.template, &job.payload) {
            Ok(rendered) => rendered,
            Err(e) => return self.dead(job, &e.to_string()).await,
        };

        let email = self.outbound(job, rendered.html, rendered.text, now);
        match self.provider.send(&email).await {
            Ok(()) => {
                tracing::info!(
                    job_id = %job.id,
                    template = %job.template,
                    provider = self.provider.name(),
                    "Email sent"
                );
                Ok(if self.queue.mark_sent(job.id).await? {
                    JobOutcome::Sent
                } else {
                    JobOutcome::Lost
                })
            }
            Err(e) => self.failed(job, &e, now).await,
        }
    }

    fn outbound(
        &self,
        job: &EmailJob,
        html: String,
        text: Option<String>,
        now: DateTime<Utc>,
    ) -> OutboundEmail {
        let mut headers = job.headers.0.clone();
        if let (EmailCategory::Marketing, Some(user_id), Some(links)) =
            (job.category, job.user_id, &self.unsubscribe)
        {
            if !headers.contains_key("List-Unsubscribe") {
                headers.extend(links.tokens.headers(&links.base_url, user_id, now));
            }
        }

        let mut email = OutboundEmail::new(&job.recipient, &job.subject, html)
            .with_headers(headers)
            .with_tag("category", job.category.to_string())
            .with_tag("template", &job.template)
            .with_tag("job_id", job.id.to_string());
        if let Some(text) = text {
            email = email.with_text(text);
        }
        if let Some(user_id) = job.user_id {
            email = email.with_tag("user_id", user_id.to_string());
        }
        email
    }

    async fn failed(
        &self,
        job: &EmailJob,
        error: &ProviderError,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome, AppError> {
        let message = error.to_string();
        match failure_disposition(job, error.is_permanent()) {
            FailureDisposition::Dead => self.dead(job, &message).await,
            FailureDisposition::Retry => {
                let updated = self.queue.mark_retry(job, &message, now).await?;
                match updated {
                    Some(updated) => {
                        tracing::warn!(
                            job_id = %job.id,
                            attempts = updated.attempts,
                            run_at = %updated.run_at,
                            error = %message,
                            "Email send failed, retry scheduled"
                        );
                        Ok(JobOutcome::Retried)
                    }
                    None => Ok(JobOutcome::Lost),
                }
            }
        }
    }

    async fn dead(&self, job: &EmailJob, error: &str) -> Result<JobOutcome, AppError> {
        if !self.queue.mark_dead(job.id, error).await? {
            return Ok(JobOutcome::Lost);
        }
        tracing::error!(
            job_id = %job.id,
            template = %job.template,
            error = %error,
            "Email job dead-lettered"
        );
        Ok(JobOutcome::Dead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use postbox_common::types::JobStatus;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn job(attempts: i32, max_attempts: i32) -> EmailJob {
        let now = Utc::now();
        EmailJob {
            id: Uuid::new_v4(),
            user_id: None,
            recipient: "a@x.com".into(),
            category: EmailCategory::Transactional,
            template: "receipt".into(),
            subject: "Receipt".into(),
            payload: serde_json::json!({}),
            headers: Json(BTreeMap::new()),
            idempotency_key: None,
            status: JobStatus::Sending,
            attempts,
            max_attempts,
            run_at: now,
            locked_at: Some(now),
            last_error: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_transient_failure_retries_until_budget() {
        assert_eq!(failure_disposition(&job(0, 6), false), FailureDisposition::Retry);
        assert_eq!(failure_disposition(&job(4, 6), false), FailureDisposition::Retry);
        assert_eq!(failure_disposition(&job(5, 6), false), FailureDisposition::Dead);
    }

    #[test]
    fn test_single_attempt_budget_dies_on_first_failure() {
        assert_eq!(failure_disposition(&job(0, 1), false), FailureDisposition::Dead);
    }

    #[test]
    fn test_permanent_failure_dies_immediately() {
        assert_eq!(failure_disposition(&job(0, 6), true), FailureDisposition::Dead);
    }

    #[test]
    fn test_report_counts_suppressed_as_sent() {
        let mut report = BatchReport::default();
        for outcome in [
            JobOutcome::Sent,
            JobOutcome::Suppressed,
            JobOutcome::Retried,
            JobOutcome::Dead,
            JobOutcome::Lost,
        ] {
            report.processed += 1;
            report.record(outcome);
        }
        assert_eq!(
            report,
            BatchReport {
                processed: 5,
                sent: 2,
                suppressed: 1,
                retried: 1,
                dead: 1,
            }
        );
    }
}
