//! Transport collaborator interface.
//!
//! The link does not implement the wire protocol; it consumes a transport
//! through the traits defined here. A production implementation backed by
//! `tokio-tungstenite` lives in the `mnml-link-ws` crate, and the test suite
//! drives the manager through an in-memory mock.
//!
//! Event delivery happens on a thread owned by the transport, independent of
//! the host thread. Event sinks must therefore never block and never call
//! back into the host's recompute machinery; see
//! [`bridge`](crate::bridge) for the sanctioned handoff.

use std::fmt;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::error::LinkResult;

/// Readiness of a transport handle, as reported by the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The connect handshake is in flight.
    Connecting,
    /// The connection is established.
    Open,
    /// A close is in flight.
    Closing,
    /// The connection is closed (or was never established).
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        };
        write!(f, "{name}")
    }
}

/// Asynchronous events delivered by a transport handle.
///
/// Invoked on the transport's own thread. Implementations stage state and
/// request deferred work; they must not block.
pub trait TransportEvents: Send + Sync {
    /// The connection was established.
    fn on_open(&self);
    /// A text message arrived.
    fn on_message(&self, text: &str);
    /// The connection closed, with the peer- or transport-supplied reason.
    fn on_close(&self, reason: &str);
    /// The transport reported an error.
    fn on_error(&self, message: &str);
}

/// An owned connection handle produced by a [`Transport`].
///
/// A handle is created detached; the manager registers its event sink, then
/// invokes [`connect`](TransportHandle::connect). Teardown runs the reverse:
/// [`detach`](TransportHandle::detach) first, so no post-teardown event can
/// reach a sink, then [`close`](TransportHandle::close).
pub trait TransportHandle: Send + Sync {
    /// Register the event sink, replacing any previous registration.
    fn register(&self, events: Arc<dyn TransportEvents>);

    /// Drop the registered event sink. No events are delivered afterwards.
    fn detach(&self);

    /// Begin connecting. Non-blocking; the outcome arrives as an
    /// [`on_open`](TransportEvents::on_open) or
    /// [`on_error`](TransportEvents::on_error) event.
    fn connect(&self);

    /// Send a text payload.
    fn send(&self, text: &str) -> LinkResult<()>;

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Current readiness as reported by the transport.
    fn ready_state(&self) -> ReadyState;
}

/// Factory for transport handles.
pub trait Transport: Send + Sync {
    /// Create a new, detached handle for `endpoint`.
    fn create(&self, endpoint: &Endpoint) -> LinkResult<Arc<dyn TransportHandle>>;
}
