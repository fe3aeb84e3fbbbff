//! Self-healing WebSocket client lifecycle for single-threaded dataflow hosts.
//!
//! This crate embeds a persistent client connection inside a host that
//! recomputes a graph of components on demand, single-threaded and
//! cooperatively scheduled. The connection survives endpoint changes,
//! detects silent death through an application-level heartbeat protocol,
//! reconnects on a fixed delay, and hands events arriving on the transport's
//! thread back to the host without races or duplicate callbacks.
//!
//! # Architecture
//!
//! ```text
//! host recompute ──► ConnectionManager::ensure(config)
//!      ▲                    │ endpoint change / dead connection
//!      │                    ▼
//!      │             teardown + reconnect (new epoch)
//!      │                    │
//!      │                    ▼
//!      │             Transport (independent thread)
//!      │                    │ on_open / on_message / on_close / on_error
//!      │                    ▼
//!      │             staged inbox + deferred recompute
//!      └────────────────────┘
//! ```
//!
//! The manager owns one transport handle at a time, tagged with a
//! monotonically increasing epoch; callbacks registered under a superseded
//! epoch are discarded before they can touch any state. Heartbeats
//! (`mnml:ping <interval>`) are answered immediately with the fixed pong and
//! arm a watchdog at one and a half advertised intervals; silence past the
//! deadline tears the connection down and reconnects.
//!
//! Outbound traffic goes through the [`MessageGate`], which suppresses
//! duplicate sends and applies the broadcast envelope
//! `{"action":"broadcast","data": ...}`.
//!
//! # Collaborators
//!
//! The host supplies a [`Scheduler`] (its deferred-execution and diagnostics
//! surface) and a [`Transport`] (connect/send/close plus async events). A
//! production transport backed by `tokio-tungstenite` lives in the
//! `mnml-link-ws` crate.
//!
//! # Example
//!
//! ```ignore
//! use mnml_link::{ConnectionManager, EndpointConfig};
//!
//! // Inside the host component's recompute pass:
//! let config = EndpointConfig::new().host("localhost").port(9000);
//! let out = manager.ensure(&config);
//! if let Some(message) = out.message {
//!     // publish the newly arrived message downstream
//! }
//! ```

pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod heartbeat;
pub mod manager;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod watchdog;

mod bridge;

// Re-exports for convenience
pub use config::{EndpointConfig, ReconnectPolicy, DEFAULT_HOST, DEFAULT_RECONNECT_INTERVAL};
pub use endpoint::Endpoint;
pub use envelope::{format_outbound, Outbound, BROADCAST_ACTION};
pub use error::{LinkError, LinkResult, Severity};
pub use gate::MessageGate;
pub use heartbeat::{HEARTBEAT_MARKER, PONG_PAYLOAD};
pub use manager::{ConnectionManager, EnsureOutput};
pub use scheduler::{DeferredFn, Scheduler};
pub use state::ConnectionState;
pub use transport::{ReadyState, Transport, TransportEvents, TransportHandle};
pub use watchdog::{Arming, Watchdog, DEFAULT_HEARTBEAT_INTERVAL};
