//! Shared application state for the Axum API server.

use std::sync::Arc;

use sqlx::PgPool;

use postbox_common::config::AppConfig;
use postbox_common::error::AppError;
use postbox_engine::{
    BackoffPolicy, ConsentService, EventLog, JobQueue, SuppressionRegistry, TemplateRenderer,
    Triggers, UnsubscribeLinks, UnsubscribeTokens, Worker,
};
use postbox_notifier::EmailProvider;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: AppConfig,
    pub queue: JobQueue,
    pub suppressions: SuppressionRegistry,
    pub consent: ConsentService,
    pub worker: Worker,
    pub triggers: Triggers,
    pub tokens: UnsubscribeTokens,
}

impl AppState {
    /// Wire the engine services around one pool, provider and renderer.
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        provider: Arc<dyn EmailProvider>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self, AppError> {
        let tokens = UnsubscribeTokens::new(&config.unsubscribe_secret)
            .map_err(|e| AppError::Config(e.to_string()))?;
        let backoff =
            BackoffPolicy::from_secs(config.retry_base_delay_secs, config.retry_max_delay_secs);

        let queue = JobQueue::new(pool.clone(), backoff);
        let suppressions = SuppressionRegistry::new(pool.clone());
        let consent = ConsentService::new(pool.clone(), suppressions.clone());
        let worker = Worker::new(
            queue.clone(),
            consent.clone(),
            provider.clone(),
            renderer.clone(),
        )
        .with_unsubscribe_links(UnsubscribeLinks {
            tokens: tokens.clone(),
            base_url: config.public_base_url.clone(),
        });
        let triggers = Triggers::new(
            EventLog::new(pool.clone()),
            queue.clone(),
            provider,
            renderer,
            config.delivery_mode,
        );

        Ok(Self {
            pool,
            config,
            queue,
            suppressions,
            consent,
            worker,
            triggers,
            tokens,
        })
    }
}
