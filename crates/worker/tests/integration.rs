//! Integration tests for the job poller.
//!
//! These tests require a running PostgreSQL database and the `DATABASE_URL`
//! environment variable to be set. Run with:
//!
//! ```bash
//! DATABASE_URL="postgres://..." cargo test -p postbox-worker --test integration -- --ignored --nocapture
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;

use postbox_common::types::{EmailCategory, JobStatus};
use postbox_engine::{
    BackoffPolicy, ConsentService, EmailJobRequest, HandlebarsRenderer, JobQueue,
    SuppressionRegistry, Worker,
};
use postbox_notifier::MemoryProvider;
use postbox_worker::poller::JobPoller;

async fn setup(pool: &PgPool, provider: &MemoryProvider) -> (JobQueue, JobPoller) {
    sqlx::migrate!("../../migrations").run(pool).await.unwrap();
    sqlx::query("DELETE FROM email_jobs")
        .execute(pool)
        .await
        .unwrap();

    let queue = JobQueue::new(pool.clone(), BackoffPolicy::default());
    let consent = ConsentService::new(pool.clone(), SuppressionRegistry::new(pool.clone()));
    let worker = Worker::new(
        queue.clone(),
        consent,
        Arc::new(provider.clone()),
        Arc::new(HandlebarsRenderer::builtin().unwrap()),
    );

    (queue, JobPoller::new(worker, 10, 1500, 900))
}

fn welcome(to: &str) -> EmailJobRequest {
    EmailJobRequest::new(to, EmailCategory::Transactional, "welcome", "Welcome")
        .with_payload(serde_json::json!({ "name": "Ada", "language": "en" }))
}

#[sqlx::test]
#[ignore] // Requires DATABASE_URL - run explicitly with --ignored
async fn test_tick_sends_due_jobs(pool: PgPool) {
    let provider = MemoryProvider::new();
    let (queue, poller) = setup(&pool, &provider).await;

    let id = queue.enqueue(&welcome("a@x.com")).await.unwrap();
    queue
        .enqueue(&welcome("later@x.com").with_run_at(Utc::now() + Duration::hours(1)))
        .await
        .unwrap();

    let report = poller.tick().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.sent, 1);
    assert!(provider.was_sent_to("a@x.com").await);
    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Sent);

    let idle = poller.tick().await.unwrap();
    assert_eq!(idle.processed, 0);
}

#[sqlx::test]
#[ignore]
async fn test_tick_recovers_stale_claims(pool: PgPool) {
    let provider = MemoryProvider::new();
    let (queue, poller) = setup(&pool, &provider).await;

    let claimed_at = Utc::now() - Duration::minutes(20);
    let id = queue
        .enqueue(&welcome("stuck@x.com").with_run_at(claimed_at - Duration::minutes(1)))
        .await
        .unwrap();

    // A worker claimed the job 20 minutes ago and never finished it.
    let claimed = queue.claim_due(10, claimed_at).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Sending);

    let report = poller.tick().await.unwrap();
    assert_eq!(report.sent, 1);

    let job = queue.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Sent);
    assert_eq!(job.attempts, 0);
    assert_eq!(provider.sent_count().await, 1);
}

#[sqlx::test]
#[ignore]
async fn test_recent_claims_are_left_alone(pool: PgPool) {
    let provider = MemoryProvider::new();
    let (queue, poller) = setup(&pool, &provider).await;

    let id = queue.enqueue(&welcome("busy@x.com")).await.unwrap();
    queue.claim(10).await.unwrap();

    let report = poller.tick().await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Sending);
    assert_eq!(provider.attempts().await, 0);
}
