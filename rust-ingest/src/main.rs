//! Hookgate Worker - drains the webhook_deliveries queue.
//!
//! Every message on the queue is a delivery the web server has already
//! verified and deduplicated. The worker parses the JSON body, logs it, and
//! acknowledges the message.

mod consumer;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hookgate::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    let config = Config::from_env();
    tracing::info!(
        amqp_url_set = !config.amqp_url.is_empty(),
        concurrency = config.worker_concurrency,
        "config_loaded"
    );

    consumer::run(config).await?;

    Ok(())
}
