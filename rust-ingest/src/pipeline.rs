//! Webhook ingestion pipeline.
//!
//! Each request walks a fixed sequence of stages:
//!
//! ```text
//! Received → SignatureChecked → DedupChecked → Accepted
//!     ↘            ↘                 ↘
//!                        Rejected
//! ```
//!
//! The pipeline never talks HTTP itself. It takes an [`IngestRequest`] and
//! returns an [`IngestOutcome`] that knows its status code.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::dedup::{DedupOutcome, DedupStore};
use crate::delivery::{InboundDelivery, IngestRequest, VerificationResult};
use crate::queue::{EnqueueError, Enqueuer};
use crate::signature;

/// Stage a request has reached, used for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    SignatureChecked,
    DedupChecked,
    Accepted,
    Rejected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::SignatureChecked => "signature_checked",
            Self::DedupChecked => "dedup_checked",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Terminal client-side rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MalformedPayload,
    InvalidSignature,
}

/// Response descriptor for one delivery.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Durably enqueued.
    Accepted { delivery_id: String },
    /// Already seen within the dedup window; not enqueued again.
    Duplicate { delivery_id: String },
    /// Refused; the sender should not retry as-is.
    Rejected(Rejection),
    /// The durable enqueue failed or timed out; the sender should retry.
    Unavailable(EnqueueError),
}

impl IngestOutcome {
    /// HTTP status the network layer should answer with.
    ///
    /// Duplicates answer like accepted deliveries so senders stop retrying.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Accepted { .. } | Self::Duplicate { .. } => StatusCode::OK,
            Self::Rejected(Rejection::MalformedPayload) => StatusCode::BAD_REQUEST,
            Self::Rejected(Rejection::InvalidSignature) => StatusCode::UNAUTHORIZED,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The verification result this outcome corresponds to, if verification
    /// got far enough to produce one.
    pub fn verification(&self) -> Option<VerificationResult> {
        match self {
            Self::Accepted { .. } => Some(VerificationResult::Valid),
            Self::Duplicate { .. } => Some(VerificationResult::DuplicateDelivery),
            Self::Rejected(Rejection::MalformedPayload) => {
                Some(VerificationResult::MalformedPayload)
            }
            Self::Rejected(Rejection::InvalidSignature) => {
                Some(VerificationResult::InvalidSignature)
            }
            Self::Unavailable(_) => None,
        }
    }

    /// Status label safe to return to the sender.
    pub fn public_status(&self) -> &'static str {
        match self {
            Self::Accepted { .. } | Self::Duplicate { .. } => "accepted",
            Self::Rejected(Rejection::MalformedPayload) => "malformed_payload",
            Self::Rejected(Rejection::InvalidSignature) => "invalid_signature",
            Self::Unavailable(_) => "unavailable",
        }
    }

    pub fn delivery_id(&self) -> Option<&str> {
        match self {
            Self::Accepted { delivery_id } | Self::Duplicate { delivery_id } => {
                Some(delivery_id.as_str())
            }
            _ => None,
        }
    }
}

/// Orchestrates verification, deduplication and durable handoff.
#[derive(Clone)]
pub struct IngestPipeline {
    secret: Arc<[u8]>,
    dedup: Arc<dyn DedupStore>,
    queue: Arc<dyn Enqueuer>,
    enqueue_timeout: Duration,
}

impl IngestPipeline {
    pub fn new(
        secret: impl AsRef<[u8]>,
        dedup: Arc<dyn DedupStore>,
        queue: Arc<dyn Enqueuer>,
        enqueue_timeout: Duration,
    ) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            dedup,
            queue,
            enqueue_timeout,
        }
    }

    /// Run one request through the pipeline to a terminal outcome.
    pub async fn ingest(&self, request: IngestRequest) -> IngestOutcome {
        let delivery = match InboundDelivery::from_request(request, Utc::now()) {
            Ok(delivery) => delivery,
            Err(reason) => {
                warn!(stage = %Stage::Received, reason = %reason, "delivery_malformed");
                return IngestOutcome::Rejected(Rejection::MalformedPayload);
            }
        };

        debug!(
            stage = %Stage::Received,
            delivery_id = %delivery.delivery_id(),
            body_length = delivery.raw_body().len(),
            "delivery_received"
        );

        match self.verify(&delivery).await {
            VerificationResult::Valid => self.hand_off(delivery).await,
            VerificationResult::DuplicateDelivery => {
                info!(
                    stage = %Stage::Rejected,
                    delivery_id = %delivery.delivery_id(),
                    "delivery_duplicate"
                );
                IngestOutcome::Duplicate {
                    delivery_id: delivery.delivery_id().to_string(),
                }
            }
            VerificationResult::InvalidSignature => {
                IngestOutcome::Rejected(Rejection::InvalidSignature)
            }
            VerificationResult::MalformedPayload => {
                IngestOutcome::Rejected(Rejection::MalformedPayload)
            }
        }
    }

    /// Check signature, payload and dedup status.
    ///
    /// A `Valid` result means the delivery id has been recorded; the caller
    /// must either enqueue the delivery or release the id.
    pub async fn verify(&self, delivery: &InboundDelivery) -> VerificationResult {
        if !signature::verify(delivery.raw_body(), delivery.signature(), &self.secret) {
            warn!(
                stage = %Stage::Rejected,
                delivery_id = %delivery.delivery_id(),
                "delivery_signature_invalid"
            );
            return VerificationResult::InvalidSignature;
        }

        debug!(
            stage = %Stage::SignatureChecked,
            delivery_id = %delivery.delivery_id(),
            "delivery_signature_valid"
        );

        if let Err(reason) = delivery.validate_payload() {
            warn!(
                stage = %Stage::Rejected,
                delivery_id = %delivery.delivery_id(),
                reason = %reason,
                "delivery_malformed"
            );
            return VerificationResult::MalformedPayload;
        }

        match self.dedup.check_and_record(delivery.delivery_id()).await {
            DedupOutcome::Fresh => {
                debug!(
                    stage = %Stage::DedupChecked,
                    delivery_id = %delivery.delivery_id(),
                    "delivery_fresh"
                );
                VerificationResult::Valid
            }
            DedupOutcome::Duplicate => VerificationResult::DuplicateDelivery,
        }
    }

    /// Durably enqueue a verified delivery within the configured timeout.
    async fn hand_off(&self, delivery: InboundDelivery) -> IngestOutcome {
        let result =
            match tokio::time::timeout(self.enqueue_timeout, self.queue.enqueue(&delivery)).await
            {
                Ok(result) => result,
                Err(_) => Err(EnqueueError::Timeout(self.enqueue_timeout)),
            };

        match result {
            Ok(()) => {
                info!(
                    stage = %Stage::Accepted,
                    delivery_id = %delivery.delivery_id(),
                    "delivery_enqueued"
                );
                IngestOutcome::Accepted {
                    delivery_id: delivery.delivery_id().to_string(),
                }
            }
            Err(e) => {
                // The sender will retry; that retry must count as fresh.
                self.dedup.release(delivery.delivery_id()).await;
                error!(
                    stage = %Stage::Rejected,
                    delivery_id = %delivery.delivery_id(),
                    error = %e,
                    "delivery_enqueue_failed"
                );
                IngestOutcome::Unavailable(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::MemoryDedupStore;
    use async_trait::async_trait;
    use axum::body::Bytes;
    use std::sync::Mutex;

    const SECRET: &str = "pipeline-secret";

    #[derive(Default)]
    struct RecordingQueue {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Enqueuer for RecordingQueue {
        async fn enqueue(&self, delivery: &InboundDelivery) -> Result<(), EnqueueError> {
            self.delivered
                .lock()
                .unwrap()
                .push(delivery.delivery_id().to_string());
            Ok(())
        }
    }

    struct FailingQueue;

    #[async_trait]
    impl Enqueuer for FailingQueue {
        async fn enqueue(&self, _delivery: &InboundDelivery) -> Result<(), EnqueueError> {
            Err(EnqueueError::Unavailable("connection refused".to_string()))
        }
    }

    fn pipeline(queue: Arc<dyn Enqueuer>) -> (IngestPipeline, Arc<MemoryDedupStore>) {
        let dedup = Arc::new(MemoryDedupStore::new(Duration::from_secs(3600)));
        let pipeline =
            IngestPipeline::new(SECRET, dedup.clone(), queue, Duration::from_millis(200));
        (pipeline, dedup)
    }

    fn signed_request(id: &str, body: &'static str) -> IngestRequest {
        IngestRequest {
            delivery_id: Some(id.to_string()),
            signature: Some(signature::sign(body.as_bytes(), SECRET.as_bytes()).into_bytes()),
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[tokio::test]
    async fn test_accepts_and_enqueues_once() {
        let queue = Arc::new(RecordingQueue::default());
        let (pipeline, _) = pipeline(queue.clone());

        let first = pipeline.ingest(signed_request("evt-1", r#"{"n":1}"#)).await;
        let replay = pipeline.ingest(signed_request("evt-1", r#"{"n":1}"#)).await;

        assert!(matches!(first, IngestOutcome::Accepted { .. }));
        assert!(matches!(replay, IngestOutcome::Duplicate { .. }));
        assert_eq!(replay.status_code(), StatusCode::OK);
        assert_eq!(
            replay.verification(),
            Some(VerificationResult::DuplicateDelivery)
        );
        assert_eq!(*queue.delivered.lock().unwrap(), vec!["evt-1".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_headers_are_malformed() {
        let queue = Arc::new(RecordingQueue::default());
        let (pipeline, dedup) = pipeline(queue.clone());

        let mut request = signed_request("evt-1", "{}");
        request.signature = None;
        let outcome = pipeline.ingest(request).await;

        assert_eq!(outcome.status_code(), StatusCode::BAD_REQUEST);
        assert!(dedup.is_empty());
        assert!(queue.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_signature_does_not_consume_id() {
        let queue = Arc::new(RecordingQueue::default());
        let (pipeline, dedup) = pipeline(queue.clone());

        let mut request = signed_request("evt-1", r#"{"n":1}"#);
        request.body = Bytes::from_static(br#"{"n":2}"#);
        let outcome = pipeline.ingest(request).await;

        assert_eq!(outcome.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(outcome.public_status(), "invalid_signature");
        assert!(dedup.is_empty());
    }

    #[tokio::test]
    async fn test_signed_non_json_is_malformed() {
        let queue = Arc::new(RecordingQueue::default());
        let (pipeline, dedup) = pipeline(queue.clone());

        let outcome = pipeline.ingest(signed_request("evt-1", "hello")).await;

        assert_eq!(outcome.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            outcome.verification(),
            Some(VerificationResult::MalformedPayload)
        );
        assert!(dedup.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_failure_releases_id() {
        let (pipeline, dedup) = pipeline(Arc::new(FailingQueue));

        let outcome = pipeline.ingest(signed_request("evt-1", "{}")).await;

        assert_eq!(outcome.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(outcome.verification(), None);
        assert!(outcome.delivery_id().is_none());
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::SignatureChecked.to_string(), "signature_checked");
        assert_eq!(Stage::Rejected.to_string(), "rejected");
    }
}
