//! HTTP routes.

pub mod health;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the trigger router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(webhooks::router())
        .merge(health::router())
        .with_state(state)
}
