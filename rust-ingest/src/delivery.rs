//! Inbound delivery types shared by the pipeline, the queue and the worker.

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Longest value an AMQP short string can carry.
const SHORT_STRING_MAX: usize = u8::MAX as usize;

/// Longest delivery id accepted from a sender. Travels as the AMQP `message_id`.
pub const MAX_DELIVERY_ID_LEN: usize = SHORT_STRING_MAX;

/// Longest content type accepted from a sender. Travels as the AMQP `content_type`.
pub const MAX_CONTENT_TYPE_LEN: usize = SHORT_STRING_MAX;

/// What the network layer hands to the ingestion pipeline.
///
/// Header values are passed through untouched; the pipeline decides whether
/// they are usable.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub delivery_id: Option<String>,
    pub signature: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Outcome of the checks performed before a delivery is handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationResult {
    Valid,
    InvalidSignature,
    MalformedPayload,
    DuplicateDelivery,
}

impl VerificationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::InvalidSignature => "invalid_signature",
            Self::MalformedPayload => "malformed_payload",
            Self::DuplicateDelivery => "duplicate_delivery",
        }
    }
}

impl std::fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was classified as a malformed payload.
///
/// Only ever logged; responses carry the generic `malformed_payload` status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("delivery id header missing")]
    MissingDeliveryId,
    #[error("delivery id is empty, too long, or not visible ASCII")]
    InvalidDeliveryId,
    #[error("content type is longer than 255 bytes")]
    ContentTypeTooLong,
    #[error("signature header missing")]
    MissingSignature,
    #[error("content type {0:?} is not JSON")]
    UnsupportedContentType(String),
    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),
}

/// One inbound webhook request that passed header extraction.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundDelivery {
    delivery_id: String,
    received_at: DateTime<Utc>,
    raw_body: Bytes,
    signature: Vec<u8>,
    content_type: String,
}

impl InboundDelivery {
    /// Build a delivery from raw parts.
    ///
    /// The delivery id and content type must each fit an AMQP short string.
    pub fn new(
        delivery_id: impl Into<String>,
        received_at: DateTime<Utc>,
        raw_body: Bytes,
        signature: Vec<u8>,
        content_type: impl Into<String>,
    ) -> Result<Self, MalformedReason> {
        let delivery_id = delivery_id.into();
        if !is_valid_delivery_id(&delivery_id) {
            return Err(MalformedReason::InvalidDeliveryId);
        }

        let content_type = content_type.into();
        if content_type.len() > MAX_CONTENT_TYPE_LEN {
            return Err(MalformedReason::ContentTypeTooLong);
        }

        Ok(Self {
            delivery_id,
            received_at,
            raw_body,
            signature,
            content_type,
        })
    }

    /// Extract a delivery from an ingest request.
    ///
    /// A missing content type is kept as an empty string; it is rejected
    /// later by [`InboundDelivery::validate_payload`].
    pub fn from_request(
        request: IngestRequest,
        received_at: DateTime<Utc>,
    ) -> Result<Self, MalformedReason> {
        let delivery_id = request
            .delivery_id
            .ok_or(MalformedReason::MissingDeliveryId)?;

        let signature = request
            .signature
            .filter(|s| !s.is_empty())
            .ok_or(MalformedReason::MissingSignature)?;

        Self::new(
            delivery_id.trim(),
            received_at,
            request.body,
            signature,
            request.content_type.unwrap_or_default(),
        )
    }

    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Check that the body is a JSON document with a JSON content type.
    pub fn validate_payload(&self) -> Result<(), MalformedReason> {
        if !is_json_content_type(&self.content_type) {
            return Err(MalformedReason::UnsupportedContentType(
                self.content_type.clone(),
            ));
        }

        serde_json::from_slice::<serde::de::IgnoredAny>(&self.raw_body)
            .map(|_| ())
            .map_err(|e| MalformedReason::InvalidJson(e.to_string()))
    }
}

fn is_valid_delivery_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_DELIVERY_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic())
}

/// Accepts `application/json` and structured `+json` types, ignoring
/// parameters such as `charset`.
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match essence.split_once('/') {
        Some(("application", subtype)) => subtype == "json" || subtype.ends_with("+json"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &'static str) -> IngestRequest {
        IngestRequest {
            delivery_id: Some("evt-123".to_string()),
            signature: Some(b"sha256=abc".to_vec()),
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_from_request_valid() {
        let now = Utc::now();
        let delivery = InboundDelivery::from_request(request(r#"{"a":1}"#), now).unwrap();

        assert_eq!(delivery.delivery_id(), "evt-123");
        assert_eq!(delivery.received_at(), now);
        assert_eq!(delivery.signature(), b"sha256=abc");
        assert_eq!(delivery.content_type(), "application/json");
        assert!(delivery.validate_payload().is_ok());
    }

    #[test]
    fn test_from_request_missing_headers() {
        let mut req = request("{}");
        req.delivery_id = None;
        assert_eq!(
            InboundDelivery::from_request(req, Utc::now()),
            Err(MalformedReason::MissingDeliveryId)
        );

        let mut req = request("{}");
        req.signature = Some(Vec::new());
        assert_eq!(
            InboundDelivery::from_request(req, Utc::now()),
            Err(MalformedReason::MissingSignature)
        );
    }

    #[test]
    fn test_delivery_id_rules() {
        assert!(is_valid_delivery_id("a1b2-c3d4"));
        assert!(!is_valid_delivery_id(""));
        assert!(!is_valid_delivery_id("has space"));
        assert!(!is_valid_delivery_id("caf\u{e9}"));
        assert!(!is_valid_delivery_id(&"x".repeat(MAX_DELIVERY_ID_LEN + 1)));
        assert!(is_valid_delivery_id(&"x".repeat(MAX_DELIVERY_ID_LEN)));
        assert_eq!(MAX_DELIVERY_ID_LEN, 255);
    }

    #[test]
    fn test_content_type_length_limit() {
        let now = Utc::now();
        let padded = |len: usize| {
            let prefix = "application/json; p=";
            format!("{}{}", prefix, "a".repeat(len - prefix.len()))
        };

        let mut req = request("{}");
        req.content_type = Some(padded(MAX_CONTENT_TYPE_LEN));
        let delivery = InboundDelivery::from_request(req, now).unwrap();
        assert!(delivery.validate_payload().is_ok());

        let mut req = request("{}");
        req.content_type = Some(padded(320));
        assert_eq!(
            InboundDelivery::from_request(req, now),
            Err(MalformedReason::ContentTypeTooLong)
        );
    }

    #[test]
    fn test_validate_payload_rejects_non_json() {
        let now = Utc::now();
        let delivery = InboundDelivery::from_request(request("not json"), now).unwrap();
        assert!(matches!(
            delivery.validate_payload(),
            Err(MalformedReason::InvalidJson(_))
        ));

        let mut req = request("{}");
        req.content_type = Some("text/plain".to_string());
        let delivery = InboundDelivery::from_request(req, now).unwrap();
        assert!(matches!(
            delivery.validate_payload(),
            Err(MalformedReason::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn test_is_json_content_type() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("Application/JSON; charset=utf-8"));
        assert!(is_json_content_type("application/cloudevents+json"));
        assert!(!is_json_content_type("text/json"));
        assert!(!is_json_content_type("application/x-www-form-urlencoded"));
        assert!(!is_json_content_type(""));
    }
}
