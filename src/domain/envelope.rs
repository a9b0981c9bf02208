//! Decoded inbound event envelope.
//!
//! The connection core treats `event` and `data` opaquely; features that
//! care about a particular event interpret `data` into their own types via
//! [`Envelope::parse_data`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::RealtimeError;

/// One decoded `{event, data}` unit delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Event name, e.g. `"message.created"`.
    pub event: String,
    /// Event payload, already normalized by the decoder.
    pub data: serde_json::Value,
    /// When the frame carrying this envelope was decoded.
    pub received_at: DateTime<Utc>,
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
            received_at: Utc::now(),
        }
    }

    /// Returns `data.phone` when it is a string.
    #[must_use]
    pub fn phone(&self) -> Option<&str> {
        self.data.get("phone").and_then(serde_json::Value::as_str)
    }

    /// Deserializes `data` into a feature-specific type.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Serialization`] if `data` does not match `T`.
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<T, RealtimeError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}
