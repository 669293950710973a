//! RabbitMQ consumer module using lapin.
//!
//! This module handles connecting to RabbitMQ, consuming messages from the
//! webhook_deliveries queue, and spawning async tasks to process each delivery
//! concurrently.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use tracing::{error, info, warn};

use hookgate::queue::publisher::declare_delivery_queue;
use hookgate::shutdown::shutdown_signal;
use hookgate::{process_delivery, Config, QueuedDelivery, DELIVERY_QUEUE};

/// Run the RabbitMQ consumer.
///
/// This function:
/// 1. Connects to RabbitMQ using the configured URL
/// 2. Sets up QoS so at most `worker_concurrency` deliveries are in flight
/// 3. Declares the queue (idempotent operation)
/// 4. Starts consuming messages, spawning a task for each
/// 5. Handles graceful shutdown on SIGINT/SIGTERM
pub async fn run(config: Config) -> Result<()> {
    info!(url_length = config.amqp_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.amqp_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let channel = conn
        .create_channel()
        .await
        .context("Failed to create channel")?;

    info!("rabbitmq_channel_created");

    let prefetch_count = config.worker_concurrency as u16;
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

    declare_delivery_queue(&channel).await?;

    info!(queue = DELIVERY_QUEUE, "rabbitmq_queue_declared");

    let mut consumer = channel
        .basic_consume(
            DELIVERY_QUEUE,
            "hookgate-worker",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(queue = DELIVERY_QUEUE, "rabbitmq_consumer_started");
    info!("worker_ready");

    let channel = Arc::new(channel);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("worker_stopping");
                break;
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let channel = Arc::clone(&channel);
                        tokio::spawn(handle_delivery(channel, delivery));
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "rabbitmq_delivery_error");
                    }
                    None => {
                        warn!("rabbitmq_consumer_closed");
                        break;
                    }
                }
            }
        }
    }

    info!("worker_shutdown_complete");
    Ok(())
}

/// Process one message and settle it with the broker.
///
/// A body that is not JSON is discarded: it is nacked without requeue and the
/// queue has no dead-letter exchange. It would fail identically on every
/// redelivery.
async fn handle_delivery(channel: Arc<Channel>, delivery: Delivery) {
    let delivery_tag = delivery.delivery_tag;
    let redelivered = delivery.redelivered;
    let queued = QueuedDelivery::from_message(&delivery.properties, delivery.data);

    info!(
        queue = DELIVERY_QUEUE,
        delivery_id = %queued.delivery_id,
        delivery_tag = delivery_tag,
        redelivered = redelivered,
        "rabbitmq_delivery_received"
    );

    match process_delivery(&queued) {
        Ok(_) => {
            if let Err(e) = channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
            {
                error!(
                    delivery_tag = delivery_tag,
                    error = %e,
                    "rabbitmq_ack_failed"
                );
            } else {
                info!(
                    queue = DELIVERY_QUEUE,
                    delivery_id = %queued.delivery_id,
                    "rabbitmq_delivery_completed"
                );
            }
        }
        Err(e) => {
            error!(
                delivery_id = %queued.delivery_id,
                error = %e,
                "delivery_process_failed"
            );

            if let Err(nack_err) = channel
                .basic_nack(delivery_tag, discard_options())
                .await
            {
                error!(
                    delivery_tag = delivery_tag,
                    error = %nack_err,
                    "rabbitmq_nack_failed"
                );
            } else {
                warn!(
                    queue = DELIVERY_QUEUE,
                    delivery_id = %queued.delivery_id,
                    "rabbitmq_delivery_discarded"
                );
            }
        }
    }
}

/// Nack options that drop a message for good.
fn discard_options() -> BasicNackOptions {
    BasicNackOptions {
        multiple: false,
        requeue: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_never_requeues() {
        let options = discard_options();
        assert!(!options.requeue);
        assert!(!options.multiple);
    }
}
