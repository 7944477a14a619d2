//! Postbox API server binary entrypoint.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use postbox_common::config::AppConfig;
use postbox_common::db::{create_pool, run_migrations};
use postbox_engine::HandlebarsRenderer;
use postbox_notifier::build_provider;

use postbox_api::routes::create_router;
use postbox_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("postbox_api=debug,postbox_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Postbox API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let provider = build_provider(&config)?;
    let renderer = if Path::new(&config.template_dir).is_dir() {
        HandlebarsRenderer::from_dir(&config.template_dir)?
    } else {
        tracing::warn!(dir = %config.template_dir, "Template directory not found, using built-in templates");
        HandlebarsRenderer::builtin()?
    };

    let addr: SocketAddr = config.api_bind_addr.parse()?;
    let state = AppState::new(pool, config, provider, Arc::new(renderer))?;

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
