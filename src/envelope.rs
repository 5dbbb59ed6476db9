//! Outbound Message Envelope
//!
//! Every forwarded message is wrapped in a `{type, data}` record, where
//! `type` is the last path segment of the MQTT topic the message arrived on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The record sent to the queue for each inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type, derived from the topic
    #[serde(rename = "type")]
    pub kind: String,
    /// Parsed JSON payload of the inbound message
    pub data: Value,
}

impl Envelope {
    /// Build an envelope for a payload delivered on `topic`
    pub fn new(topic: &str, data: Value) -> Self {
        Self {
            kind: message_type(topic).to_string(),
            data,
        }
    }

    /// Serialize to the JSON text handed to the queue client
    pub fn to_body(&self) -> String {
        // A struct of String + Value cannot fail to serialize
        serde_json::to_string(self).expect("envelope serialization")
    }
}

/// Derive the message type from a topic: the substring after the final `/`.
/// A topic without a separator is its own type.
pub fn message_type(topic: &str) -> &str {
    match topic.rsplit_once('/') {
        Some((_, tail)) => tail,
        None => topic,
    }
}
