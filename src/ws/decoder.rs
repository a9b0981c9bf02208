//! Inbound frame decoding.
//!
//! Classifies a frame as a keepalive acknowledgement, debug noise, or a
//! payload, and parses payloads into an [`Envelope`]. Decoding never fails
//! loudly: anything that is not a well-formed `{"event", "data"}` object is
//! dropped and logged at `debug`.

use serde_json::Value;

use super::transport::Frame;
use crate::domain::Envelope;

/// Keepalive tokens exchanged with the peer. Never dispatched.
pub const CONTROL_TOKENS: [&str; 3] = ["ping", "pong", "ok"];

/// Decodes a transport frame into an envelope.
///
/// Binary frames are read as UTF-8; invalid UTF-8 yields `None`.
#[must_use]
pub fn decode(frame: &Frame) -> Option<Envelope> {
    match frame {
        Frame::Text(text) => decode_text(text),
        Frame::Binary(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => decode_text(text),
            Err(e) => {
                tracing::debug!(len = bytes.len(), error = %e, "dropping non-UTF-8 binary frame");
                None
            }
        },
    }
}

/// Decodes a text frame into an envelope.
#[must_use]
pub fn decode_text(text: &str) -> Option<Envelope> {
    let trimmed = text.trim();
    if is_control_token(trimmed) {
        return None;
    }
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        if !trimmed.is_empty() {
            tracing::debug!(len = trimmed.len(), "dropping non-JSON frame");
        }
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed JSON frame");
            return None;
        }
    };

    let Value::Object(mut fields) = value else {
        tracing::debug!("dropping JSON frame that is not an object");
        return None;
    };
    let Some(Value::String(event)) = fields.remove("event") else {
        tracing::debug!("dropping JSON frame without a string event");
        return None;
    };
    let Some(mut data) = fields.remove("data") else {
        tracing::debug!(%event, "dropping JSON frame without data");
        return None;
    };

    normalize_phone(&mut data);
    Some(Envelope::new(event, data))
}

/// Returns `true` for the reserved keepalive tokens.
#[must_use]
pub fn is_control_token(text: &str) -> bool {
    CONTROL_TOKENS.contains(&text)
}

/// Strips leading `+` signs from `data.phone`. Applying it twice is a no-op.
fn normalize_phone(data: &mut Value) {
    if let Some(Value::String(phone)) = data.get_mut("phone")
        && phone.starts_with('+')
    {
        *phone = phone.trim_start_matches('+').to_string();
    }
}
