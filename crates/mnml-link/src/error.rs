//! Error types and diagnostic severities.
//!
//! Every failure the link can encounter is handled locally and surfaced to
//! the host as a diagnostic (severity + text); nothing here is allowed to
//! terminate the host process or a recompute cycle.

use std::fmt;

use thiserror::Error;

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors that can occur while operating a link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The transport reported an error event.
    #[error("Error {0}")]
    Transport(String),

    /// The transport closed the connection.
    #[error("CLOSE {reason}")]
    ConnectionClosed {
        /// Reason supplied by the peer or the transport.
        reason: String,
    },

    /// Failed to hand a message to the transport.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// No heartbeat arrived within the watchdog tolerance.
    #[error("connection may have died")]
    LivenessTimeout,

    /// A heartbeat message carried no extractable interval.
    #[error("heartbeat without interval: {0}")]
    MalformedHeartbeat(String),

    /// Outbound message text is not a structured document.
    #[error("payload is not valid JSON: {0}")]
    PayloadParse(String),
}

impl LinkError {
    /// Create a transport error from an error event message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a connection closed error from a close reason.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Create a send failed error.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed(reason.into())
    }

    /// Diagnostic severity this error surfaces at.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Transport(_) | Self::ConnectionClosed { .. } | Self::SendFailed(_) => {
                Severity::Warning
            }
            Self::LivenessTimeout => Severity::Error,
            Self::MalformedHeartbeat(_) | Self::PayloadParse(_) => Severity::Remark,
        }
    }

    /// Whether the link recovers from this error on its own.
    ///
    /// Everything except a liveness timeout clears without forcing a handle
    /// replacement; a timeout tears the handle down before reconnecting.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::LivenessTimeout)
    }
}

/// Severity of a diagnostic surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational; the cycle produced a usable result.
    Remark,
    /// Degraded but recovering (e.g. reconnecting).
    Warning,
    /// Something is wrong enough that the user should look.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Remark => "Remark",
            Self::Warning => "Warning",
            Self::Error => "Error",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_diagnostic_text() {
        let err = LinkError::connection_closed("going away");
        assert_eq!(err.to_string(), "CLOSE going away");
        assert_eq!(err.severity(), Severity::Warning);
    }

    #[test]
    fn test_error_event_diagnostic_text() {
        let err = LinkError::transport("connection refused");
        assert_eq!(err.to_string(), "Error connection refused");
    }

    #[test]
    fn test_liveness_timeout_is_error_severity() {
        let err = LinkError::LivenessTimeout;
        assert_eq!(err.severity(), Severity::Error);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_parse_failures_are_remarks() {
        assert_eq!(
            LinkError::PayloadParse("hello".into()).severity(),
            Severity::Remark
        );
        assert_eq!(
            LinkError::MalformedHeartbeat("mnml:ping".into()).severity(),
            Severity::Remark
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Remark < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }
}
