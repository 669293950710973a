//! Web server module for receiving webhooks.
//!
//! This module provides a thin axum layer over the ingestion pipeline:
//! - `POST /webhook` runs a delivery through the pipeline
//! - `GET /health` answers liveness probes
//!
//! Verification, deduplication and the durable handoff all live in the
//! pipeline.

pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{health, receive_webhook, AppState, HealthResponse, WebhookResponse};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(receive_webhook))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
