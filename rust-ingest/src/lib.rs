//! Hookgate - verified, deduplicated webhook ingestion.
//!
//! This library provides shared modules for the two Hookgate binaries:
//! - `hookgate-web`: Web server that verifies, deduplicates and enqueues webhooks
//! - `hookgate-worker`: Consumer that drains the queue and logs each payload
//!
//! ## Architecture
//!
//! ```text
//! Webhooks → Web Server → IngestPipeline → webhook_deliveries → Worker
//!                           ├─ signature
//!                           └─ dedup
//! ```

pub mod config;
pub mod dedup;
pub mod delivery;
pub mod pipeline;
pub mod process;
pub mod queue;
pub mod shutdown;
pub mod signature;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use dedup::{DedupOutcome, DedupStore, MemoryDedupStore};
pub use delivery::{InboundDelivery, IngestRequest, VerificationResult};
pub use pipeline::{IngestOutcome, IngestPipeline, Rejection};
pub use process::process_delivery;
pub use queue::{EnqueueError, Enqueuer, Publisher, QueuedDelivery, DELIVERY_QUEUE};
pub use web::AppState;
