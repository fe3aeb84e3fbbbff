//! Link configuration.
//!
//! This module defines the per-cycle input configuration consumed by
//! [`ConnectionManager::ensure`](crate::manager::ConnectionManager::ensure)
//! and the reconnection policy derived from it.

use std::time::Duration;

use crate::endpoint::Endpoint;

/// Default host when none is supplied.
pub const DEFAULT_HOST: &str = "localhost";

/// Default fixed reconnection delay.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);

/// Per-cycle input configuration for a link.
///
/// The host re-solves its components on demand, so this struct is rebuilt
/// from the component's inputs on every recompute cycle. Inputs may be
/// temporarily absent while upstream components are still solving; a missing
/// `port` means the configuration does not resolve yet and the manager
/// leaves all state untouched for that cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Host name (defaults to `"localhost"` when absent).
    pub host: Option<String>,
    /// Port number. Required; without it the configuration is not ready.
    pub port: Option<u16>,
    /// Fixed reconnection delay in milliseconds (defaults to 1000).
    pub reconnect_interval_ms: Option<u64>,
}

impl EndpointConfig {
    /// Create an empty (not ready) configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host name.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the reconnection delay in milliseconds.
    pub fn reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.reconnect_interval_ms = Some(ms);
        self
    }

    /// Resolve the endpoint, if the configuration is ready.
    ///
    /// The host falls back to [`DEFAULT_HOST`]; the port has no fallback.
    pub fn endpoint(&self) -> Option<Endpoint> {
        let port = self.port?;
        let host = self.host.as_deref().unwrap_or(DEFAULT_HOST);
        Some(Endpoint::new(host, port))
    }

    /// Resolve the reconnection policy for this cycle.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect_interval_ms
            .map_or_else(ReconnectPolicy::default, |ms| {
                ReconnectPolicy::new(Duration::from_millis(ms))
            })
    }
}

/// Fixed-delay reconnection policy.
///
/// Deliberately not exponential: the link targets local tooling endpoints
/// where a constant short retry keeps the feedback loop tight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay between a connection fault and the next connection attempt.
    pub interval: Duration,
}

impl ReconnectPolicy {
    /// Create a policy with the given fixed delay.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}
