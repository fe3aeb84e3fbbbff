//! Application-level heartbeat protocol.
//!
//! The server proves liveness by periodically sending a message containing
//! [`HEARTBEAT_MARKER`] and the interval, in milliseconds, at which further
//! heartbeats will arrive. The client answers every heartbeat immediately
//! with the fixed [`PONG_PAYLOAD`] and arms a watchdog deadline; silence
//! beyond the tolerance declares the connection dead.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Substring identifying a server heartbeat message.
pub const HEARTBEAT_MARKER: &str = "mnml:ping";

/// Literal reply sent immediately upon receiving a heartbeat.
pub const PONG_PAYLOAD: &str = r#"{"action":"broadcast","data":"mnml:pong"}"#;

/// Whether `text` is a heartbeat message.
pub fn is_heartbeat(text: &str) -> bool {
    text.contains(HEARTBEAT_MARKER)
}

/// Extract the advertised heartbeat interval.
///
/// The interval is the first decimal integer anywhere in the message.
/// Returns `None` when no integer is present or it does not fit; the caller
/// keeps the previously advertised interval in that case.
pub fn parse_interval(text: &str) -> Option<Duration> {
    static INTERVAL_RE: OnceLock<Regex> = OnceLock::new();
    let re = INTERVAL_RE.get_or_init(|| Regex::new(r"[0-9]+").expect("valid regex"));
    let ms = re.find(text)?.as_str().parse::<u64>().ok()?;
    Some(Duration::from_millis(ms))
}
