//! Queue module for the durable handoff to downstream processing.
//!
//! This module provides:
//! - The [`Enqueuer`] collaborator trait used by the ingestion pipeline
//! - AMQP message mapping for inbound deliveries
//! - An async RabbitMQ publisher with publisher confirms
//!
//! ## Architecture
//!
//! ```text
//! Web Server → webhook_deliveries queue → Worker
//! ```

pub mod publisher;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::delivery::InboundDelivery;

pub use publisher::Publisher;
pub use types::{QueuedDelivery, DELIVERY_QUEUE};

/// Failure to durably hand a delivery to the processing queue.
///
/// Every variant is transient from the sender's point of view.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("enqueue not acknowledged within {0:?}")]
    Timeout(Duration),
    #[error("broker rejected the message")]
    Rejected,
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Durable handoff of accepted deliveries.
///
/// `enqueue` must return `Ok` only once the delivery is persisted.
#[async_trait]
pub trait Enqueuer: Send + Sync {
    async fn enqueue(&self, delivery: &InboundDelivery) -> Result<(), EnqueueError>;
}
