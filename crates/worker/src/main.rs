use std::path::Path;
use std::sync::Arc;

use postbox_common::config::AppConfig;
use postbox_common::db;
use postbox_engine::{
    BackoffPolicy, ConsentService, HandlebarsRenderer, JobQueue, SuppressionRegistry,
    UnsubscribeLinks, UnsubscribeTokens, Worker,
};
use postbox_notifier::build_provider;
use postbox_worker::poller::JobPoller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "postbox_worker=info,postbox_engine=info,postbox_notifier=debug".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Postbox worker starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let provider = build_provider(&config)?;
    let renderer = if Path::new(&config.template_dir).is_dir() {
        HandlebarsRenderer::from_dir(&config.template_dir)?
    } else {
        tracing::warn!(dir = %config.template_dir, "Template directory not found, using built-in templates");
        HandlebarsRenderer::builtin()?
    };

    let backoff =
        BackoffPolicy::from_secs(config.retry_base_delay_secs, config.retry_max_delay_secs);
    let queue = JobQueue::new(pool.clone(), backoff);
    let consent = ConsentService::new(pool.clone(), SuppressionRegistry::new(pool));
    let worker = Worker::new(queue, consent, provider, Arc::new(renderer)).with_unsubscribe_links(
        UnsubscribeLinks {
            tokens: UnsubscribeTokens::new(&config.unsubscribe_secret)?,
            base_url: config.public_base_url.clone(),
        },
    );

    let poller = JobPoller::new(
        worker,
        config.worker_batch_size,
        config.worker_poll_interval_ms,
        config.worker_stale_claim_secs,
    );

    // Run with graceful shutdown on Ctrl+C. A batch in flight is abandoned;
    // its claimed jobs are picked up again once the claim goes stale.
    tokio::select! {
        result = poller.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Job poller exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Postbox worker stopped.");
    Ok(())
}
