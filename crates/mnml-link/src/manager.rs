//! Connection lifecycle management.
//!
//! The [`ConnectionManager`] owns one transport handle at a time and runs
//! the connection state machine from the host's recompute cycle: the host
//! calls [`ensure`](ConnectionManager::ensure) with the cycle's inputs, and
//! the manager drains staged transport events, reconciles the endpoint, and
//! reconnects when the previous handle died. All connection decisions happen
//! here, on the host thread; the callback side only stages (see
//! [`bridge`](crate::bridge)-internal relay).

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::bridge::{EventRelay, SharedState};
use crate::config::{EndpointConfig, ReconnectPolicy};
use crate::endpoint::Endpoint;
use crate::error::{LinkError, Severity};
use crate::scheduler::Scheduler;
use crate::state::ConnectionState;
use crate::transport::{ReadyState, Transport, TransportHandle};

/// Outputs of one `ensure` cycle, published by the host.
pub struct EnsureOutput {
    /// The current handle, for downstream send components. `None` while no
    /// handle exists (not ready, or between teardown and reconnect).
    pub handle: Option<Arc<dyn TransportHandle>>,
    /// The latest non-heartbeat message, present only when a new one arrived
    /// since the previous cycle.
    pub message: Option<String>,
    /// Most recent diagnostic text, for the status output.
    pub status: Option<String>,
}

/// The connection aggregate: one live handle at a time, tagged by epoch.
#[derive(Default)]
struct Connection {
    state: ConnectionState,
    handle: Option<Arc<dyn TransportHandle>>,
    endpoint: Option<Endpoint>,
    epoch: u64,
    last_diagnostic: Option<String>,
    reconnect_at: Option<Instant>,
}

/// Owns the transport handle and drives the connection state machine.
///
/// Single-threaded by construction: every method runs on the host thread.
/// Transport events reach it only through the staged inbox, drained at the
/// start of each [`ensure`](ConnectionManager::ensure).
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    shared: Arc<SharedState>,
    conn: Connection,
    policy: ReconnectPolicy,
}

impl ConnectionManager {
    /// Create a manager with no connection.
    pub fn new(transport: Arc<dyn Transport>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            transport,
            scheduler,
            shared: SharedState::new(),
            conn: Connection::default(),
            policy: ReconnectPolicy::default(),
        }
    }

    /// Current connection state, for inspection.
    pub fn state(&self) -> ConnectionState {
        self.conn.state
    }

    /// Epoch of the current handle.
    pub fn epoch(&self) -> u64 {
        self.conn.epoch
    }

    /// Reconcile the connection with this cycle's inputs.
    ///
    /// Called from the host's recompute pass. When the configuration does
    /// not resolve (missing port), nothing is touched and the previous
    /// outputs are republished; this is not an error. Otherwise staged
    /// transport events are drained first, then the endpoint is reconciled:
    /// an unchanged endpoint with an open handle is a no-op, a changed
    /// endpoint tears down and reconnects, and a dead connection reconnects
    /// once its delay has elapsed.
    pub fn ensure(&mut self, config: &EndpointConfig) -> EnsureOutput {
        let Some(endpoint) = config.endpoint() else {
            return self.output(None);
        };
        self.policy = config.reconnect_policy();
        self.shared.set_reconnect_interval(self.policy.interval);

        let message = self.drain();

        if self.conn.endpoint.as_ref() != Some(&endpoint) {
            self.teardown();
            self.connect(endpoint);
            return self.output(message);
        }

        match self.conn.state {
            ConnectionState::Disconnected => self.connect(endpoint),
            ConnectionState::PendingReconnect => {
                let due = self
                    .conn
                    .reconnect_at
                    .map_or(true, |at| Instant::now() >= at);
                if due {
                    self.teardown();
                    self.connect(endpoint);
                }
            }
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing => {}
        }

        self.output(message)
    }

    /// Tear the connection down for removal from the host graph.
    ///
    /// Detaches event sinks before closing, so no post-teardown event can
    /// touch the manager; ends `Disconnected` with no handle. Also invoked
    /// on drop.
    pub fn shutdown(&mut self) {
        if self.conn.handle.is_none() && self.conn.state == ConnectionState::Disconnected {
            return;
        }
        info!(epoch = self.conn.epoch, "shutting down link");
        self.conn.state = ConnectionState::Closing;
        self.teardown();
        self.conn.state = ConnectionState::Disconnected;
        self.conn.endpoint = None;
        self.conn.reconnect_at = None;
    }

    /// Apply staged transport events. The only consumption point.
    fn drain(&mut self) -> Option<String> {
        let (opened, fault, message, notes, watchdog_expired) = {
            let mut inbox = self.shared.inbox.lock();
            (
                std::mem::take(&mut inbox.opened),
                inbox.fault.take(),
                inbox.latest_message.take(),
                std::mem::take(&mut inbox.notes),
                std::mem::take(&mut inbox.watchdog_expired),
            )
        };

        for (severity, text) in notes {
            self.scheduler.add_diagnostic(severity, &text);
        }

        if opened && self.conn.state == ConnectionState::Connecting {
            debug!(epoch = self.conn.epoch, "connection open");
            self.conn.state = ConnectionState::Open;
            self.conn.last_diagnostic = None;
            self.scheduler.clear_diagnostics();
        }

        if let Some(fault) = fault {
            if matches!(
                self.conn.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                warn!(epoch = self.conn.epoch, diagnostic = %fault.diagnostic, "connection fault");
                self.conn.state = ConnectionState::PendingReconnect;
                self.conn.reconnect_at = Some(fault.at + self.policy.interval);
                self.scheduler
                    .add_diagnostic(fault.severity, &fault.diagnostic);
                self.conn.last_diagnostic = Some(fault.diagnostic);
            }
        }

        if watchdog_expired && self.conn.state == ConnectionState::Open {
            let err = LinkError::LivenessTimeout;
            warn!(epoch = self.conn.epoch, "no heartbeat within tolerance");
            // Force-close first if the transport still believes it is open.
            if let Some(handle) = &self.conn.handle {
                if handle.ready_state() == ReadyState::Open {
                    handle.close();
                }
            }
            self.teardown();
            // Clearing the endpoint makes the next cycle reconnect fresh.
            self.conn.endpoint = None;
            self.conn.state = ConnectionState::PendingReconnect;
            self.conn.reconnect_at = None;
            self.scheduler
                .add_diagnostic(err.severity(), &err.to_string());
            self.conn.last_diagnostic = Some(err.to_string());
        }

        message
    }

    /// Discard the current handle: new epoch first, so in-flight events are
    /// stale before the handle is touched; detach before close, so nothing
    /// is delivered while closing.
    fn teardown(&mut self) {
        self.conn.epoch = self.shared.advance_epoch();
        if let Some(handle) = self.conn.handle.take() {
            handle.detach();
            handle.close();
        }
        let mut inbox = self.shared.inbox.lock();
        inbox.opened = false;
        inbox.fault = None;
        inbox.watchdog_expired = false;
        inbox.watchdog.disarm();
    }

    /// Create, register, and connect a fresh handle for `endpoint`.
    fn connect(&mut self, endpoint: Endpoint) {
        let epoch = self.shared.advance_epoch();
        debug!(epoch, endpoint = %endpoint, "connecting");
        match self.transport.create(&endpoint) {
            Ok(handle) => {
                let relay = EventRelay::new(
                    Arc::clone(&self.shared),
                    Arc::clone(&self.scheduler),
                    epoch,
                );
                relay.bind_handle(&handle);
                handle.register(relay);
                handle.connect();
                self.conn.state = ConnectionState::Connecting;
                self.conn.handle = Some(handle);
                self.conn.endpoint = Some(endpoint);
                self.conn.epoch = epoch;
                self.conn.reconnect_at = None;
            }
            Err(err) => {
                warn!(epoch, endpoint = %endpoint, error = %err, "transport create failed");
                self.conn.state = ConnectionState::PendingReconnect;
                self.conn.handle = None;
                self.conn.endpoint = Some(endpoint);
                self.conn.epoch = epoch;
                self.conn.reconnect_at = Some(Instant::now() + self.policy.interval);
                self.scheduler
                    .add_diagnostic(Severity::Warning, &err.to_string());
                self.conn.last_diagnostic = Some(err.to_string());
                let expire = Arc::clone(&self.scheduler);
                self.scheduler.schedule_deferred(
                    self.policy.interval,
                    Box::new(move || expire.expire_result()),
                );
            }
        }
    }

    fn output(&self, message: Option<String>) -> EnsureOutput {
        EnsureOutput {
            handle: self.conn.handle.clone(),
            message,
            status: self.conn.last_diagnostic.clone(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
