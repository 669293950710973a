//! Async RabbitMQ publisher for durable delivery handoff.
//!
//! The publisher keeps one connection and one confirm-mode channel that are
//! shared across all request handlers, reconnecting lazily when the channel
//! drops.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::types::{delivery_properties, DELIVERY_QUEUE};
use super::{EnqueueError, Enqueuer};
use crate::delivery::InboundDelivery;

/// Async RabbitMQ publisher with connection management.
///
/// Messages are published as persistent to a durable queue on a channel in
/// confirm mode, so a successful publish means the broker has taken
/// responsibility for the message.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    /// Create a new publisher with the given RabbitMQ URL.
    ///
    /// No connection is made until the first publish.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        info!("rabbitmq_publisher_connected");

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        declare_delivery_queue(&ch).await?;

        info!(queue = DELIVERY_QUEUE, "rabbitmq_queue_declared");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Publish a delivery and wait for the broker's confirm.
    pub async fn publish_delivery(&self, delivery: &InboundDelivery) -> Result<(), EnqueueError> {
        let channel = self
            .ensure_connected()
            .await
            .map_err(|e| EnqueueError::Unavailable(format!("{:#}", e)))?;

        let confirmation = channel
            .basic_publish(
                "",
                DELIVERY_QUEUE,
                BasicPublishOptions::default(),
                delivery.raw_body(),
                delivery_properties(delivery),
            )
            .await
            .context("Failed to publish to delivery queue")
            .map_err(|e| EnqueueError::Unavailable(format!("{:#}", e)))?
            .await
            .context("Failed to confirm publish")
            .map_err(|e| EnqueueError::Unavailable(format!("{:#}", e)))?;

        if confirmation.is_nack() {
            return Err(EnqueueError::Rejected);
        }

        info!(
            queue = DELIVERY_QUEUE,
            delivery_id = %delivery.delivery_id(),
            body_length = delivery.raw_body().len(),
            "rabbitmq_delivery_published"
        );

        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}

#[async_trait]
impl Enqueuer for Publisher {
    async fn enqueue(&self, delivery: &InboundDelivery) -> Result<(), EnqueueError> {
        self.publish_delivery(delivery).await.map_err(|e| {
            error!(
                delivery_id = %delivery.delivery_id(),
                error = %e,
                "rabbitmq_publish_failed"
            );
            e
        })
    }
}

/// Declare the durable delivery queue (idempotent).
pub async fn declare_delivery_queue(channel: &Channel) -> Result<()> {
    channel
        .queue_declare(
            DELIVERY_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare delivery queue")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_creation() {
        let publisher = Publisher::new("amqp://localhost:5672".to_string());
        assert!(Arc::strong_count(&publisher.inner) == 1);

        let cloned = publisher.clone();
        assert!(Arc::strong_count(&cloned.inner) == 2);
    }
}
