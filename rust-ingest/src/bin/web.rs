//! Hookgate Web Server - verified webhook receiver.
//!
//! This binary:
//! - Receives webhooks on `POST /webhook`
//! - Verifies the HMAC signature and rejects replays
//! - Durably enqueues accepted deliveries to RabbitMQ before answering
//!
//! Processing of the payload happens in the worker.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hookgate::dedup::spawn_sweeper;
use hookgate::shutdown::shutdown_signal;
use hookgate::web::router;
use hookgate::{AppState, Config, IngestPipeline, MemoryDedupStore, Publisher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        signing_configured = config.signing_secret.is_some(),
        delivery_id_header = %config.delivery_id_header,
        signature_header = %config.signature_header,
        dedup_retention_secs = config.dedup_retention.as_secs(),
        enqueue_timeout_ms = config.enqueue_timeout.as_millis() as u64,
        max_body_bytes = config.max_body_bytes,
        "config_loaded"
    );

    let secret = config
        .signing_secret
        .clone()
        .context("WEBHOOK_SIGNING_SECRET must be set")?;

    let publisher = Publisher::new(config.amqp_url.clone());
    info!("rabbitmq_publisher_created");

    let dedup = Arc::new(MemoryDedupStore::new(config.dedup_retention));
    let sweeper = spawn_sweeper(dedup.clone(), config.dedup_sweep_interval);

    let pipeline = IngestPipeline::new(
        secret,
        dedup,
        Arc::new(publisher.clone()),
        config.enqueue_timeout,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config, pipeline));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("web_server_shutting_down");
        })
        .await
        .context("Server error")?;

    sweeper.abort();
    publisher.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}
