//! Webhook endpoint handlers.
//!
//! These handlers only translate between HTTP and the ingestion pipeline:
//! 1. Pull the delivery id, signature and content type out of the headers
//! 2. Run the pipeline
//! 3. Map the outcome to a status code and a minimal JSON body

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::delivery::IngestRequest;
use crate::pipeline::IngestPipeline;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: IngestPipeline,
}

impl AppState {
    pub fn new(config: Config, pipeline: IngestPipeline) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook response.
///
/// Never carries internal error detail.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
}

/// Webhook endpoint.
///
/// The raw body is taken as bytes so the signature is checked against exactly
/// what the sender signed.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request = IngestRequest {
        delivery_id: header_str(&headers, &state.config.delivery_id_header),
        signature: headers
            .get(state.config.signature_header.as_str())
            .map(|v| v.as_bytes().to_vec()),
        content_type: header_str(&headers, CONTENT_TYPE.as_str()),
        body,
    };

    info!(
        delivery_id = ?request.delivery_id,
        has_signature = request.signature.is_some(),
        body_length = request.body.len(),
        "webhook_received"
    );

    let outcome = state.pipeline.ingest(request).await;

    (
        outcome.status_code(),
        Json(WebhookResponse {
            status: outcome.public_status(),
            delivery_id: outcome.delivery_id().map(str::to_string),
        }),
    )
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
