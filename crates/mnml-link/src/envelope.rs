//! Outbound payload formatting.
//!
//! User messages leave the link either as canonicalized JSON, as an opaque
//! string, or wrapped in the broadcast envelope
//! `{"action":"broadcast","data": ...}`. The formatting rule is ordered and
//! exact; see [`format_outbound`].

use serde::Serialize;
use serde_json::Value;

/// Action tag of the broadcast envelope.
pub const BROADCAST_ACTION: &str = "broadcast";

/// Envelope applied to outbound broadcast messages.
#[derive(Debug, Serialize)]
struct BroadcastEnvelope<'a> {
    action: &'a str,
    data: Value,
}

/// A formatted payload ready for transmission.
///
/// `payload` mirrors exactly the bytes handed to the transport, so the host
/// can republish what was actually sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// The exact text transmitted.
    pub payload: String,
    /// The content was not a structured document and was sent as an opaque
    /// string. Surfaced to the host as a remark, never as a failure.
    pub raw_fallback: bool,
}

/// Format `content` for transmission.
///
/// The rule, in order:
///
/// 1. Parse `content` as JSON. On failure the content is treated as an
///    opaque string and formatting continues (`raw_fallback` is set).
/// 2. `broadcast == true`: the payload is always the broadcast envelope,
///    with `data` the parsed value or the raw string.
/// 3. `broadcast == false`: the payload is the re-serialized (compact)
///    value when parsing succeeded, or the original string unchanged.
pub fn format_outbound(content: &str, broadcast: bool) -> Outbound {
    let parsed = serde_json::from_str::<Value>(content).ok();
    let raw_fallback = parsed.is_none();

    let payload = if broadcast {
        let envelope = BroadcastEnvelope {
            action: BROADCAST_ACTION,
            data: parsed.unwrap_or_else(|| Value::String(content.to_owned())),
        };
        serde_json::to_string(&envelope).unwrap_or_else(|_| content.to_owned())
    } else {
        match parsed {
            Some(value) => value.to_string(),
            None => content.to_owned(),
        }
    };

    Outbound {
        payload,
        raw_fallback,
    }
}
