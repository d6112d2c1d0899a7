//! Wire codec for the marketplace socket protocol.
//!
//! Every text frame is a numeric packet code glued directly to a JSON body
//! (`420["find","market/listing",{...}]`). The code is stripped on decode and
//! not otherwise interpreted; all outbound frames carry code `420`.
//!
//! Inbound bodies are two-element JSON arrays told apart by shape alone:
//! the protocol has no message-kind field. An authentication acknowledgement
//! carries an object with `accessToken` and `user` keys in its second slot; a
//! push event carries an event-type string containing `"pushed"` in its first
//! slot; everything else is a response `[error-or-null, payload]` for the
//! oldest in-flight request. The push discriminant is a substring match and
//! therefore fragile: a service that ever names a response slot with a string
//! containing "pushed" would be misrouted. It is kept as-is because the
//! protocol is fixed on the server side.

use serde_json::Value;
use thiserror::Error;

/// Packet code prefixed to every outbound request frame.
const REQUEST_CODE: &str = "420";

/// Substring that marks a two-element body as a push event.
const PUSH_MARKER: &str = "pushed";

/// Errors produced while decoding an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame does not start with a packet code followed by a body.
    #[error("Frame has no packet code prefix")]
    MissingCode,

    /// Frame body is not valid JSON.
    #[error("Frame body is not valid JSON: {0}")]
    InvalidJson(String),
}

/// A decoded inbound frame, classified by the shape heuristics above.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Authentication acknowledgement; `payload` is the second slot.
    AuthAck {
        /// Object carrying `accessToken`, `user`, and session metadata.
        payload: Value,
    },

    /// Unsolicited push event. `event_type` is the raw, unsanitized string;
    /// dispatch keys must go through [`sanitize_event_type`] first.
    Push {
        /// Raw event-type string (e.g. `"system/notification pushed"`).
        event_type: String,
        /// Event payload from the second slot.
        data: Value,
    },

    /// Response for the oldest in-flight request.
    Response {
        /// Error slot; `None` when the first element is JSON null.
        error: Option<Value>,
        /// Payload slot.
        payload: Value,
    },

    /// Any body that is not a two-element array (heartbeats, engine-level
    /// chatter). Dropped by the dispatcher with a debug log.
    Other {
        /// The decoded body, kept for logging.
        body: Value,
    },
}

/// Encode an outbound request frame: code `420` + `[method, service, payload]`.
pub fn encode_request(method: &str, service: &str, payload: &Value) -> String {
    let body = Value::Array(vec![
        Value::String(method.to_string()),
        Value::String(service.to_string()),
        payload.clone(),
    ]);
    format!("{}{}", REQUEST_CODE, body)
}

/// Decode and classify one inbound text frame.
pub fn decode(text: &str) -> Result<InboundFrame, FrameError> {
    let body = strip_code(text).ok_or(FrameError::MissingCode)?;
    let parsed: Value =
        serde_json::from_str(body).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
    Ok(classify(parsed))
}

/// Split the leading run of ASCII digits from the JSON body.
///
/// Mirrors the `^(\d+)(.+)$` split: at least one digit, at least one byte of
/// body. The code itself is discarded.
fn strip_code(text: &str) -> Option<&str> {
    let digits = text.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits == text.len() {
        return None;
    }
    Some(&text[digits..])
}

/// Classify a decoded body. Order matters and mirrors the service contract:
/// auth acknowledgement first, then push, then response.
fn classify(body: Value) -> InboundFrame {
    let Value::Array(items) = body else {
        return InboundFrame::Other { body };
    };
    if items.len() != 2 {
        return InboundFrame::Other { body: Value::Array(items) };
    }

    let mut items = items;
    let second = items.pop().unwrap_or(Value::Null);
    let first = items.pop().unwrap_or(Value::Null);

    if second.is_object()
        && second.get("accessToken").is_some()
        && second.get("user").is_some()
    {
        return InboundFrame::AuthAck { payload: second };
    }

    if let Value::String(event_type) = &first {
        if event_type.contains(PUSH_MARKER) {
            return InboundFrame::Push { event_type: event_type.clone(), data: second };
        }
    }

    let error = if first.is_null() { None } else { Some(first) };
    InboundFrame::Response { error, payload: second }
}

/// Sanitize an event-type string for use as a dispatch key.
///
/// Every character outside `[a-zA-Z0-9\-/:_]` becomes `_`, so
/// `"system/notification pushed"` keys as `"system/notification_pushed"`.
/// Subscribers must use the sanitized form.
pub fn sanitize_event_type(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | ':' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
