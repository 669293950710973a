//! Delivery processing for the worker.
//!
//! The ingest side only guarantees that each accepted delivery reaches the
//! queue. The worker reads it back, parses the JSON body and logs it.
//!
//! ## Processing Flow
//!
//! ```text
//! QueuedDelivery → process_delivery() → serde_json::Value
//! ```

use thiserror::Error;
use tracing::info;

use crate::queue::QueuedDelivery;

/// Why a queued delivery could not be processed.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The body is not JSON. Retrying cannot fix this.
    #[error("delivery {delivery_id} body is not valid JSON: {source}")]
    InvalidJson {
        delivery_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse and log one queued delivery.
pub fn process_delivery(delivery: &QueuedDelivery) -> Result<serde_json::Value, ProcessError> {
    let payload: serde_json::Value =
        serde_json::from_slice(&delivery.body).map_err(|source| ProcessError::InvalidJson {
            delivery_id: delivery.delivery_id.clone(),
            source,
        })?;

    let latency_ms = delivery
        .received_at
        .map(|at| (chrono::Utc::now() - at).num_milliseconds());

    info!(
        delivery_id = %delivery.delivery_id,
        content_type = ?delivery.content_type,
        queue_latency_ms = ?latency_ms,
        payload = %payload,
        "delivery_processed"
    );

    Ok(payload)
}
