//! WebSocket message envelope
//!
//! Every frame in either direction carries one JSON object:
//!
//! ```json
//! {"type": "echo", "payload": "ping"}
//! {"type": "broadcast", "payload": {"any": ["json", "value"]}}
//! {"type": "healthcheck"}
//! ```
//!
//! `type` selects the handler; `payload` is handed to it uninterpreted and
//! defaults to `null` when absent.

use crate::core::error::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type answered by the echo handler
pub const ECHO: &str = "echo";

/// Message type fanned out by the broadcast handler
pub const BROADCAST: &str = "broadcast";

/// Message type answered by the in-protocol health check
pub const HEALTH_CHECK: &str = "healthcheck";

/// Fixed payload of a health-check reply
pub const HEALTH_CHECK_REPLY: &str = "Server is running";

/// A decoded `{type, payload}` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,

    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    /// Decode an inbound frame
    ///
    /// Fails on anything that is not a JSON object with a string `type`.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom("envelope must be a JSON object"));
        }
        serde_json::from_value(value)
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }
}
