//! Cross-thread staging between transport callbacks and the host.
//!
//! The transport delivers events on its own thread; the host consumes them
//! on its single recompute thread. The handoff is strictly two-phase: event
//! handlers only stage fields in the [`Inbox`] and request a deferred
//! recompute, and the manager's drain during `ensure()` is the only reader.
//! Every relay carries the epoch it was registered under; once the shared
//! epoch advances, its events are discarded before any state is touched.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::DEFAULT_RECONNECT_INTERVAL;
use crate::error::{LinkError, Severity};
use crate::heartbeat;
use crate::scheduler::Scheduler;
use crate::transport::{TransportEvents, TransportHandle};
use crate::watchdog::Watchdog;

/// Delay for message-triggered recomputes: small enough to feel immediate,
/// large enough to coalesce bursts.
pub(crate) const RECOMPUTE_DEBOUNCE: Duration = Duration::from_millis(5);

/// A staged connection fault.
#[derive(Debug)]
pub(crate) struct Fault {
    /// Severity the fault surfaces at.
    pub severity: Severity,
    /// Diagnostic text published to the host.
    pub diagnostic: String,
    /// When the fault was observed; the reconnect delay counts from here.
    pub at: Instant,
}

/// Fields written by transport callbacks and drained by the host.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    /// The transport reported open since the last drain.
    pub opened: bool,
    /// The most recent close/error fault, replacing any earlier one.
    pub fault: Option<Fault>,
    /// Latest non-heartbeat message; taken by the drain that publishes it.
    pub latest_message: Option<String>,
    /// Diagnostics staged off-thread, published at the next drain.
    pub notes: Vec<(Severity, String)>,
    /// A watchdog deadline found the connection dead.
    pub watchdog_expired: bool,
    /// Heartbeat liveness tracking for the current handle.
    pub watchdog: Watchdog,
}

/// State shared between the host thread and transport callback threads.
pub(crate) struct SharedState {
    epoch: AtomicU64,
    reconnect_interval_ms: AtomicU64,
    recompute_pending: AtomicBool,
    /// Staged event fields.
    pub inbox: Mutex<Inbox>,
}

impl SharedState {
    /// Create shared state at epoch zero.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            epoch: AtomicU64::new(0),
            reconnect_interval_ms: AtomicU64::new(
                u64::try_from(DEFAULT_RECONNECT_INTERVAL.as_millis()).unwrap_or(u64::MAX),
            ),
            recompute_pending: AtomicBool::new(false),
            inbox: Mutex::new(Inbox::default()),
        })
    }

    /// The epoch current events must carry.
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Advance to a fresh epoch, invalidating all in-flight events.
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Publish the reconnect delay used when scheduling fault wakeups.
    pub fn set_reconnect_interval(&self, interval: Duration) {
        self.reconnect_interval_ms.store(
            u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            Ordering::Release,
        );
    }

    /// Reconnect delay as last published by the host.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.load(Ordering::Acquire))
    }

    /// Request a deferred recompute, coalescing with one already pending.
    pub fn request_recompute(self: &Arc<Self>, scheduler: &Arc<dyn Scheduler>, delay: Duration) {
        if self.recompute_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(self);
        let expire = Arc::clone(scheduler);
        scheduler.schedule_deferred(
            delay,
            Box::new(move || {
                shared.recompute_pending.store(false, Ordering::Release);
                expire.expire_result();
            }),
        );
    }
}

/// Per-handle event sink.
///
/// Stages transport events for the host and performs the receipt-time
/// heartbeat duties: pong reply and watchdog re-arm.
pub(crate) struct EventRelay {
    shared: Arc<SharedState>,
    scheduler: Arc<dyn Scheduler>,
    epoch: u64,
    handle: Mutex<Option<Weak<dyn TransportHandle>>>,
}

impl EventRelay {
    /// Create a relay registered under `epoch`.
    pub fn new(shared: Arc<SharedState>, scheduler: Arc<dyn Scheduler>, epoch: u64) -> Arc<Self> {
        Arc::new(Self {
            shared,
            scheduler,
            epoch,
            handle: Mutex::new(None),
        })
    }

    /// Bind the handle this relay replies through.
    ///
    /// Held weakly: the manager owns the handle, and a relay must never keep
    /// a discarded handle alive.
    pub fn bind_handle(&self, handle: &Arc<dyn TransportHandle>) {
        *self.handle.lock() = Some(Arc::downgrade(handle));
    }

    fn reply_handle(&self) -> Option<Arc<dyn TransportHandle>> {
        self.handle.lock().as_ref().and_then(Weak::upgrade)
    }

    fn is_current(&self) -> bool {
        self.shared.current_epoch() == self.epoch
    }

    fn handle_heartbeat(&self, text: &str) {
        let interval = heartbeat::parse_interval(text);
        let arming = {
            let mut inbox = self.shared.inbox.lock();
            if interval.is_none() {
                let note = LinkError::MalformedHeartbeat(text.to_owned());
                inbox.notes.push((note.severity(), note.to_string()));
            }
            inbox.watchdog.observe_heartbeat(Instant::now(), interval)
        };
        trace!(epoch = self.epoch, delay = ?arming.delay, "heartbeat");

        if let Some(handle) = self.reply_handle() {
            if let Err(err) = handle.send(heartbeat::PONG_PAYLOAD) {
                warn!(epoch = self.epoch, error = %err, "heartbeat reply failed");
            }
        }

        let shared = Arc::clone(&self.shared);
        let expire = Arc::clone(&self.scheduler);
        let epoch = self.epoch;
        let generation = arming.generation;
        self.scheduler.schedule_deferred(
            arming.delay,
            Box::new(move || {
                if shared.current_epoch() != epoch {
                    return;
                }
                let expired = {
                    let mut inbox = shared.inbox.lock();
                    if inbox.watchdog.expired(Instant::now(), generation) {
                        inbox.watchdog_expired = true;
                        inbox.watchdog.disarm();
                        true
                    } else {
                        false
                    }
                };
                if expired {
                    expire.expire_result();
                }
            }),
        );
    }

    fn record_fault(&self, err: &LinkError) {
        if !self.is_current() {
            trace!(epoch = self.epoch, "discarding stale fault event");
            return;
        }
        warn!(epoch = self.epoch, error = %err, "transport fault");
        {
            let mut inbox = self.shared.inbox.lock();
            inbox.fault = Some(Fault {
                severity: err.severity(),
                diagnostic: err.to_string(),
                at: Instant::now(),
            });
        }
        // Fault wakeups bypass the debounce flag: the fixed reconnect delay
        // must fire even when a message recompute is already pending.
        let expire = Arc::clone(&self.scheduler);
        self.scheduler.schedule_deferred(
            self.shared.reconnect_interval(),
            Box::new(move || expire.expire_result()),
        );
    }
}

impl TransportEvents for EventRelay {
    fn on_open(&self) {
        if !self.is_current() {
            trace!(epoch = self.epoch, "discarding stale open event");
            return;
        }
        debug!(epoch = self.epoch, "transport open");
        self.shared.inbox.lock().opened = true;
        self.shared
            .request_recompute(&self.scheduler, RECOMPUTE_DEBOUNCE);
    }

    fn on_message(&self, text: &str) {
        if !self.is_current() {
            trace!(epoch = self.epoch, "discarding stale message");
            return;
        }
        if heartbeat::is_heartbeat(text) {
            self.handle_heartbeat(text);
        } else {
            self.shared.inbox.lock().latest_message = Some(text.to_owned());
            self.shared
                .request_recompute(&self.scheduler, RECOMPUTE_DEBOUNCE);
        }
    }

    fn on_close(&self, reason: &str) {
        self.record_fault(&LinkError::connection_closed(reason));
    }

    fn on_error(&self, message: &str) {
        self.record_fault(&LinkError::transport(message));
    }
}
