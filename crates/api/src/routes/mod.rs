pub mod consent;
pub mod health;
pub mod jobs;
pub mod suppressions;
pub mod triggers;
pub mod unsubscribe;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .merge(triggers::router())
        .merge(suppressions::router())
        .merge(consent::router())
        .merge(webhooks::router())
        .merge(unsubscribe::router())
        .with_state(state)
}
