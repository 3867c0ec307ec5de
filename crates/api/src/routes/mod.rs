//! API routes

pub mod health;
pub mod webhooks;


use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        // Every other method gets a JSON 405 before anything is read
        .route(
            "/api/webhooks/stripe",
            post(webhooks::stripe_webhook).fallback(webhooks::method_not_allowed),
        )
        .with_state(state)
}
