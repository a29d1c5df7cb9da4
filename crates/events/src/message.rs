use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message handed to the broker by the outbox publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Broker message id; equals the outbox row id so deliveries can be
    /// traced back to their staging row.
    pub message_id: Uuid,

    /// Fully-qualified event type (the `type` header).
    pub event_type: String,

    /// Routing key derived from `event_type`.
    pub routing_key: String,

    /// JSON object of the event's payload fields; dates are ISO-8601 UTC
    /// strings.
    pub body: Value,

    /// Durable/persistent delivery flag.
    pub persistent: bool,
}

/// A message received from a queue, before any decoding.
///
/// The body is kept raw: inbound parsing is deliberately tolerant and needs
/// the original bytes for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned delivery id, used for acknowledgement.
    pub delivery_id: String,

    /// Routing key the message was published with, when the broker carries
    /// one.
    pub routing_key: Option<String>,

    /// Raw body exactly as it came off the wire.
    pub body: String,
}
