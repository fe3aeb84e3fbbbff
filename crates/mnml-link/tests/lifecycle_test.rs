//! Connection lifecycle integration tests.
//!
//! These tests drive the manager through an in-memory transport and a fake
//! scheduler, covering the full cycle: connect, open, heartbeat/watchdog,
//! fault and reconnect, endpoint replacement, and teardown. Deferred work is
//! executed explicitly by the test harness; watchdog timing uses real small
//! sleeps because the deadline checks compare wall-clock instants.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mnml_link::{
    ConnectionManager, ConnectionState, DeferredFn, Endpoint, EndpointConfig, LinkResult,
    MessageGate, ReadyState, Scheduler, Severity, Transport, TransportEvents, TransportHandle,
    PONG_PAYLOAD,
};

/// One recorded operation against the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Create(String),
    Register(u64),
    Detach(u64),
    Connect(u64),
    Send(u64, String),
    Close(u64),
}

/// Deferred work captured by the fake scheduler.
struct Deferred {
    delay: Duration,
    work: DeferredFn,
}

/// Records scheduled work and diagnostics; the test runs deferred callbacks
/// explicitly, standing in for the host thread.
#[derive(Default)]
struct FakeScheduler {
    queue: Mutex<Vec<Deferred>>,
    expirations: AtomicUsize,
    diagnostics: Mutex<Vec<(Severity, String)>>,
    clears: AtomicUsize,
}

impl Scheduler for FakeScheduler {
    fn schedule_deferred(&self, delay: Duration, work: DeferredFn) {
        self.queue.lock().unwrap().push(Deferred { delay, work });
    }

    fn expire_result(&self) {
        self.expirations.fetch_add(1, Ordering::SeqCst);
    }

    fn add_diagnostic(&self, severity: Severity, text: &str) {
        self.diagnostics
            .lock()
            .unwrap()
            .push((severity, text.to_string()));
    }

    fn clear_diagnostics(&self) {
        self.diagnostics.lock().unwrap().clear();
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeScheduler {
    /// Run every captured deferred callback, in scheduling order.
    fn run_all(&self) {
        loop {
            let batch: Vec<Deferred> = self.queue.lock().unwrap().drain(..).collect();
            if batch.is_empty() {
                return;
            }
            for deferred in batch {
                (deferred.work)();
            }
        }
    }

    /// Delays of everything scheduled so far, in order.
    fn scheduled_delays(&self) -> Vec<Duration> {
        self.queue.lock().unwrap().iter().map(|d| d.delay).collect()
    }

    fn diagnostics(&self) -> Vec<(Severity, String)> {
        self.diagnostics.lock().unwrap().clone()
    }

    fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

/// In-memory transport handle; events are fired by the test.
struct MockHandle {
    serial: u64,
    log: Arc<Mutex<Vec<Op>>>,
    events: Mutex<Option<Arc<dyn TransportEvents>>>,
    ready: AtomicU8,
}

impl MockHandle {
    fn record(&self, op: Op) {
        self.log.lock().unwrap().push(op);
    }

    fn set_ready(&self, state: ReadyState) {
        let code = match state {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        };
        self.ready.store(code, Ordering::SeqCst);
    }

    /// The registered event sink, bypassing detach (for stale-event tests).
    fn events(&self) -> Option<Arc<dyn TransportEvents>> {
        self.events.lock().unwrap().clone()
    }

    fn fire_open(&self) {
        self.set_ready(ReadyState::Open);
        if let Some(events) = self.events() {
            events.on_open();
        }
    }

    fn fire_message(&self, text: &str) {
        if let Some(events) = self.events() {
            events.on_message(text);
        }
    }

    fn fire_close(&self, reason: &str) {
        self.set_ready(ReadyState::Closed);
        if let Some(events) = self.events() {
            events.on_close(reason);
        }
    }

    fn fire_error(&self, message: &str) {
        if let Some(events) = self.events() {
            events.on_error(message);
        }
    }

    /// Payloads sent through this handle, in order.
    fn sent(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                Op::Send(serial, text) if *serial == self.serial => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl TransportHandle for MockHandle {
    fn register(&self, events: Arc<dyn TransportEvents>) {
        self.record(Op::Register(self.serial));
        *self.events.lock().unwrap() = Some(events);
    }

    fn detach(&self) {
        self.record(Op::Detach(self.serial));
        *self.events.lock().unwrap() = None;
    }

    fn connect(&self) {
        self.record(Op::Connect(self.serial));
        self.set_ready(ReadyState::Connecting);
    }

    fn send(&self, text: &str) -> LinkResult<()> {
        self.record(Op::Send(self.serial, text.to_string()));
        Ok(())
    }

    fn close(&self) {
        self.record(Op::Close(self.serial));
        self.set_ready(ReadyState::Closed);
    }

    fn ready_state(&self) -> ReadyState {
        match self.ready.load(Ordering::SeqCst) {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

#[derive(Default)]
struct MockTransport {
    log: Arc<Mutex<Vec<Op>>>,
    serial: AtomicU64,
    handles: Mutex<Vec<Arc<MockHandle>>>,
}

impl MockTransport {
    fn handle(&self, index: usize) -> Arc<MockHandle> {
        Arc::clone(&self.handles.lock().unwrap()[index])
    }

    fn created(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    fn ops(&self) -> Vec<Op> {
        self.log.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn create(&self, endpoint: &Endpoint) -> LinkResult<Arc<dyn TransportHandle>> {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push(Op::Create(endpoint.uri()));
        let handle = Arc::new(MockHandle {
            serial,
            log: Arc::clone(&self.log),
            events: Mutex::new(None),
            ready: AtomicU8::new(3),
        });
        self.handles.lock().unwrap().push(Arc::clone(&handle));
        Ok(handle)
    }
}

fn setup() -> (ConnectionManager, Arc<MockTransport>, Arc<FakeScheduler>) {
    let transport = Arc::new(MockTransport::default());
    let scheduler = Arc::new(FakeScheduler::default());
    let manager = ConnectionManager::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
    );
    (manager, transport, scheduler)
}

fn ready_config(port: u16) -> EndpointConfig {
    EndpointConfig::new().host("localhost").port(port)
}

/// Connect and bring the link to `Open`.
fn open_link(
    manager: &mut ConnectionManager,
    transport: &MockTransport,
    scheduler: &FakeScheduler,
    port: u16,
) -> Arc<MockHandle> {
    manager.ensure(&ready_config(port));
    let handle = transport.handle(transport.created() - 1);
    handle.fire_open();
    scheduler.run_all();
    manager.ensure(&ready_config(port));
    assert_eq!(manager.state(), ConnectionState::Open);
    handle
}

#[test]
fn test_config_not_ready_touches_nothing() {
    let (mut manager, transport, _scheduler) = setup();
    let out = manager.ensure(&EndpointConfig::new().host("localhost"));
    assert!(out.handle.is_none());
    assert!(out.message.is_none());
    assert_eq!(transport.created(), 0);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[test]
fn test_first_ensure_connects() {
    let (mut manager, transport, _scheduler) = setup();
    let out = manager.ensure(&ready_config(9000));
    assert!(out.handle.is_some());
    assert_eq!(manager.state(), ConnectionState::Connecting);
    let ops = transport.ops();
    assert_eq!(
        ops,
        vec![
            Op::Create("ws://localhost:9000".to_string()),
            Op::Register(1),
            Op::Connect(1),
        ]
    );
}

#[test]
fn test_open_clears_diagnostics() {
    let (mut manager, transport, scheduler) = setup();
    open_link(&mut manager, &transport, &scheduler, 9000);
    assert!(scheduler.clears() >= 1);
    assert!(scheduler.diagnostics().is_empty());
}

#[test]
fn test_ensure_unchanged_open_is_noop() {
    let (mut manager, transport, scheduler) = setup();
    open_link(&mut manager, &transport, &scheduler, 9000);
    let ops_before = transport.ops().len();
    let epoch_before = manager.epoch();
    manager.ensure(&ready_config(9000));
    assert_eq!(transport.ops().len(), ops_before);
    assert_eq!(manager.epoch(), epoch_before);
    assert_eq!(manager.state(), ConnectionState::Open);
}

#[test]
fn test_endpoint_change_unregisters_before_new_handle() {
    let (mut manager, transport, scheduler) = setup();
    open_link(&mut manager, &transport, &scheduler, 9000);
    let epoch_before = manager.epoch();

    manager.ensure(&ready_config(9001));

    let ops = transport.ops();
    let detach_old = ops.iter().position(|op| *op == Op::Detach(1)).unwrap();
    let close_old = ops.iter().position(|op| *op == Op::Close(1)).unwrap();
    let create_new = ops
        .iter()
        .position(|op| *op == Op::Create("ws://localhost:9001".to_string()))
        .unwrap();
    assert!(detach_old < close_old);
    assert!(close_old < create_new);
    assert!(manager.epoch() > epoch_before);
    assert_eq!(transport.created(), 2);
}

#[test]
fn test_stale_events_after_replacement_are_discarded() {
    let (mut manager, transport, scheduler) = setup();
    let old = open_link(&mut manager, &transport, &scheduler, 9000);
    // Keep the sink alive past detach to exercise the epoch guard itself.
    let stale_events = old.events().unwrap();

    manager.ensure(&ready_config(9001));
    stale_events.on_message("zombie");
    stale_events.on_open();
    stale_events.on_close("late close");

    scheduler.run_all();
    let out = manager.ensure(&ready_config(9001));
    assert!(out.message.is_none());
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert!(scheduler.diagnostics().is_empty());
}

#[test]
fn test_heartbeat_pongs_immediately_and_arms_watchdog() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);

    handle.fire_message("mnml:ping 2000");

    // The reply goes out at receipt, before any recompute runs.
    assert_eq!(handle.sent(), vec![PONG_PAYLOAD.to_string()]);
    let delays = scheduler.scheduled_delays();
    assert_eq!(delays.last(), Some(&Duration::from_millis(3000)));
}

#[test]
fn test_heartbeat_is_not_published_as_message() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);

    handle.fire_message("mnml:ping 2000");
    let out = manager.ensure(&ready_config(9000));
    assert!(out.message.is_none());
}

#[test]
fn test_silence_past_tolerance_declares_death() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);

    handle.fire_message("mnml:ping 40");
    thread::sleep(Duration::from_millis(70));
    scheduler.run_all();

    let out = manager.ensure(&ready_config(9000));
    assert!(scheduler
        .diagnostics()
        .iter()
        .any(|(severity, text)| *severity == Severity::Error
            && text.contains("connection may have died")));
    assert_eq!(out.status.as_deref(), Some("connection may have died"));
    // The dead handle was force-closed and replaced in the same pass.
    assert!(transport.ops().contains(&Op::Close(1)));
    assert_eq!(transport.created(), 2);
    assert_eq!(manager.state(), ConnectionState::Connecting);
}

#[test]
fn test_silence_within_tolerance_keeps_connection() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);

    handle.fire_message("mnml:ping 200");
    thread::sleep(Duration::from_millis(20));
    scheduler.run_all();

    manager.ensure(&ready_config(9000));
    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(transport.created(), 1);
    assert!(!scheduler
        .diagnostics()
        .iter()
        .any(|(severity, _)| *severity == Severity::Error));
}

#[test]
fn test_fresh_heartbeat_supersedes_pending_deadline() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);

    handle.fire_message("mnml:ping 60");
    thread::sleep(Duration::from_millis(50));
    handle.fire_message("mnml:ping 60");
    thread::sleep(Duration::from_millis(50));
    // The first deadline is past due, but the second heartbeat re-armed.
    scheduler.run_all();

    manager.ensure(&ready_config(9000));
    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(transport.created(), 1);
}

#[test]
fn test_malformed_heartbeat_keeps_interval_and_remarks() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);

    handle.fire_message("mnml:ping 2000");
    handle.fire_message("mnml:ping");

    // Both heartbeats are answered; the second re-arms with the prior
    // interval.
    assert_eq!(
        handle.sent(),
        vec![PONG_PAYLOAD.to_string(), PONG_PAYLOAD.to_string()]
    );
    let delays = scheduler.scheduled_delays();
    assert_eq!(delays.last(), Some(&Duration::from_millis(3000)));

    manager.ensure(&ready_config(9000));
    assert!(scheduler
        .diagnostics()
        .iter()
        .any(|(severity, text)| *severity == Severity::Remark
            && text.contains("heartbeat without interval")));
    assert_eq!(manager.state(), ConnectionState::Open);
}

#[test]
fn test_close_fault_reconnects_after_fixed_delay() {
    let (mut manager, transport, scheduler) = setup();
    let config = ready_config(9000).reconnect_interval_ms(30);
    manager.ensure(&config);
    let handle = transport.handle(0);
    handle.fire_open();
    scheduler.run_all();
    manager.ensure(&config);
    assert_eq!(manager.state(), ConnectionState::Open);

    handle.fire_close("going away");

    // An early recompute sees the fault but does not reconnect yet.
    let out = manager.ensure(&config);
    assert_eq!(manager.state(), ConnectionState::PendingReconnect);
    assert_eq!(manager.state().label(), "Disconnected");
    assert_eq!(out.status.as_deref(), Some("CLOSE going away"));
    assert!(scheduler
        .diagnostics()
        .iter()
        .any(|(severity, text)| *severity == Severity::Warning && text == "CLOSE going away"));
    assert_eq!(transport.created(), 1);

    thread::sleep(Duration::from_millis(40));
    scheduler.run_all();
    manager.ensure(&config);
    assert_eq!(transport.created(), 2);
    assert_eq!(manager.state(), ConnectionState::Connecting);
}

#[test]
fn test_error_fault_uses_error_event_text() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);

    handle.fire_error("connection reset");
    let out = manager.ensure(&ready_config(9000));
    assert_eq!(out.status.as_deref(), Some("Error connection reset"));
}

#[test]
fn test_diagnostics_clear_once_reconnected() {
    let (mut manager, transport, scheduler) = setup();
    let config = ready_config(9000).reconnect_interval_ms(10);
    manager.ensure(&config);
    transport.handle(0).fire_open();
    scheduler.run_all();
    manager.ensure(&config);

    transport.handle(0).fire_close("going away");
    thread::sleep(Duration::from_millis(15));
    scheduler.run_all();
    manager.ensure(&config);
    assert!(!scheduler.diagnostics().is_empty());

    transport.handle(1).fire_open();
    scheduler.run_all();
    let out = manager.ensure(&config);
    assert!(scheduler.diagnostics().is_empty());
    assert!(out.status.is_none());
    assert_eq!(manager.state(), ConnectionState::Open);
}

#[test]
fn test_never_opening_transport_reconnects_with_increasing_epochs() {
    let (mut manager, transport, scheduler) = setup();
    let config = ready_config(9000).reconnect_interval_ms(10);

    let mut epochs = Vec::new();
    for attempt in 0..5usize {
        manager.ensure(&config);
        assert_eq!(transport.created(), attempt + 1);
        epochs.push(manager.epoch());
        transport
            .handle(attempt)
            .fire_error("connection refused");
        thread::sleep(Duration::from_millis(15));
        scheduler.run_all();
    }

    assert_eq!(transport.created(), 5);
    assert!(epochs.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_message_publish_and_burst_coalescing() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);

    let delays_before = scheduler.scheduled_delays().len();
    handle.fire_message(r#"{"reading": 1}"#);
    handle.fire_message(r#"{"reading": 2}"#);
    handle.fire_message(r#"{"reading": 3}"#);
    // A burst coalesces into a single deferred recompute.
    assert_eq!(scheduler.scheduled_delays().len(), delays_before + 1);
    assert_eq!(
        scheduler.scheduled_delays().last(),
        Some(&Duration::from_millis(5))
    );

    scheduler.run_all();
    let out = manager.ensure(&ready_config(9000));
    assert_eq!(out.message.as_deref(), Some(r#"{"reading": 3}"#));

    // Emitted only when a new one arrived.
    let out = manager.ensure(&ready_config(9000));
    assert!(out.message.is_none());
}

#[test]
fn test_shutdown_detaches_then_closes_and_disconnects() {
    let (mut manager, transport, scheduler) = setup();
    open_link(&mut manager, &transport, &scheduler, 9000);

    manager.shutdown();

    let ops = transport.ops();
    let detach = ops.iter().position(|op| *op == Op::Detach(1)).unwrap();
    let close = ops.iter().position(|op| *op == Op::Close(1)).unwrap();
    assert!(detach < close);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.state().label(), "Disconnected");
}

#[test]
fn test_send_gate_suppresses_duplicates_through_transport() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);
    let mut gate = MessageGate::new();

    gate.send_through(handle.as_ref(), scheduler.as_ref(), r#"{"x":1}"#, false, false)
        .unwrap();
    gate.send_through(handle.as_ref(), scheduler.as_ref(), r#"{"x":1}"#, false, false)
        .unwrap();
    assert_eq!(handle.sent(), vec![r#"{"x":1}"#.to_string()]);

    gate.send_through(handle.as_ref(), scheduler.as_ref(), r#"{"x":1}"#, false, true)
        .unwrap();
    assert_eq!(handle.sent().len(), 2);
}

#[test]
fn test_send_gate_raw_fallback_remark() {
    let (mut manager, transport, scheduler) = setup();
    let handle = open_link(&mut manager, &transport, &scheduler, 9000);
    let mut gate = MessageGate::new();

    let out = gate
        .send_through(handle.as_ref(), scheduler.as_ref(), "hello", true, false)
        .unwrap()
        .unwrap();
    assert_eq!(out.payload, r#"{"action":"broadcast","data":"hello"}"#);
    assert_eq!(handle.sent(), vec![out.payload.clone()]);
    assert!(scheduler
        .diagnostics()
        .iter()
        .any(|(severity, _)| *severity == Severity::Remark));
}
