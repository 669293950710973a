//! AMQP message mapping for inbound deliveries.
//!
//! The message body is the raw request body, byte for byte. Delivery metadata
//! travels in the message properties and headers so the worker never has to
//! unwrap an envelope.

use chrono::{DateTime, TimeZone, Utc};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::BasicProperties;

use crate::delivery::InboundDelivery;

/// Queue name for accepted webhook deliveries.
pub const DELIVERY_QUEUE: &str = "webhook_deliveries";

/// Header holding the RFC 3339 receive time.
pub const RECEIVED_AT_HEADER: &str = "x-received-at";

/// Header holding the signature exactly as the sender supplied it.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Persistent delivery mode for AMQP messages.
const PERSISTENT: u8 = 2;

/// Build the AMQP properties for a delivery.
///
/// `message_id` and `content_type` are AMQP short strings; [`InboundDelivery`]
/// guarantees both fit in 255 bytes.
pub fn delivery_properties(delivery: &InboundDelivery) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(RECEIVED_AT_HEADER),
        AMQPValue::LongString(LongString::from(delivery.received_at().to_rfc3339())),
    );
    headers.insert(
        ShortString::from(SIGNATURE_HEADER),
        AMQPValue::LongString(LongString::from(delivery.signature().to_vec())),
    );

    BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_content_type(ShortString::from(delivery.content_type()))
        .with_message_id(ShortString::from(delivery.delivery_id()))
        .with_timestamp(delivery.received_at().timestamp().max(0) as u64)
        .with_headers(headers)
}

/// A delivery as read back off the queue by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedDelivery {
    pub delivery_id: String,
    pub content_type: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub body: Vec<u8>,
}

impl QueuedDelivery {
    /// Rebuild a queued delivery from AMQP properties and body.
    pub fn from_message(properties: &BasicProperties, body: Vec<u8>) -> Self {
        let delivery_id = properties
            .message_id()
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let content_type = properties.content_type().as_ref().map(|s| s.to_string());

        let received_at = received_at_from_headers(properties).or_else(|| {
            (*properties.timestamp())
                .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single())
        });

        Self {
            delivery_id,
            content_type,
            received_at,
            body,
        }
    }
}

fn received_at_from_headers(properties: &BasicProperties) -> Option<DateTime<Utc>> {
    let headers = properties.headers().as_ref()?;
    match headers.inner().get(&ShortString::from(RECEIVED_AT_HEADER))? {
        AMQPValue::LongString(value) => {
            let text = std::str::from_utf8(value.as_bytes()).ok()?;
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}
