//! WebSocket transport implementation.
//!
//! Each [`WsHandle`] owns a dedicated I/O thread driving a current-thread
//! tokio runtime: the thread completes the handshake, pumps the socket, and
//! delivers events from there — never from the host thread. Handle methods
//! (`send`, `close`) only enqueue commands onto the I/O thread, so they are
//! safe to call from transport callbacks as well as from the host.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};
use tungstenite::Message;

use mnml_link::{
    Endpoint, LinkError, LinkResult, ReadyState, Transport, TransportEvents, TransportHandle,
};

/// Commands crossing from handle methods into the I/O thread.
enum WsCommand {
    Send(String),
    Close,
}

/// Shared, cloneable event sink slot.
type EventSlot = Arc<Mutex<Option<Arc<dyn TransportEvents>>>>;

const READY_CONNECTING: u8 = 0;
const READY_OPEN: u8 = 1;
const READY_CLOSING: u8 = 2;
const READY_CLOSED: u8 = 3;

fn encode_ready(state: ReadyState) -> u8 {
    match state {
        ReadyState::Connecting => READY_CONNECTING,
        ReadyState::Open => READY_OPEN,
        ReadyState::Closing => READY_CLOSING,
        ReadyState::Closed => READY_CLOSED,
    }
}

fn decode_ready(code: u8) -> ReadyState {
    match code {
        READY_CONNECTING => ReadyState::Connecting,
        READY_OPEN => ReadyState::Open,
        READY_CLOSING => ReadyState::Closing,
        _ => ReadyState::Closed,
    }
}

/// Factory producing [`WsHandle`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl WsTransport {
    /// Create a new transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn create(&self, endpoint: &Endpoint) -> LinkResult<Arc<dyn TransportHandle>> {
        Ok(Arc::new(WsHandle::new(endpoint.uri())))
    }
}

/// A WebSocket connection driven by a dedicated I/O thread.
///
/// Created detached and closed; [`connect`](TransportHandle::connect) spawns
/// the I/O thread. Dropping the handle drops the command channel, which the
/// I/O thread treats as a close request.
pub struct WsHandle {
    uri: String,
    events: EventSlot,
    commands: Mutex<Option<UnboundedSender<WsCommand>>>,
    ready: Arc<AtomicU8>,
}

impl WsHandle {
    fn new(uri: String) -> Self {
        Self {
            uri,
            events: Arc::new(Mutex::new(None)),
            commands: Mutex::new(None),
            ready: Arc::new(AtomicU8::new(READY_CLOSED)),
        }
    }
}

impl TransportHandle for WsHandle {
    fn register(&self, events: Arc<dyn TransportEvents>) {
        *self.events.lock() = Some(events);
    }

    fn detach(&self) {
        *self.events.lock() = None;
    }

    fn connect(&self) {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.commands.lock() = Some(tx);
        self.ready
            .store(encode_ready(ReadyState::Connecting), Ordering::SeqCst);

        let uri = self.uri.clone();
        let events = Arc::clone(&self.events);
        let ready = Arc::clone(&self.ready);
        thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(error = %err, "failed to build I/O runtime");
                    ready.store(READY_CLOSED, Ordering::SeqCst);
                    if let Some(sink) = events.lock().clone() {
                        sink.on_error(&err.to_string());
                    }
                    return;
                }
            };
            runtime.block_on(drive(&uri, rx, &events, &ready));
        });
    }

    fn send(&self, text: &str) -> LinkResult<()> {
        let commands = self.commands.lock();
        let Some(tx) = commands.as_ref() else {
            return Err(LinkError::send_failed("not connected"));
        };
        tx.send(WsCommand::Send(text.to_owned()))
            .map_err(|_| LinkError::send_failed("connection task gone"))
    }

    fn close(&self) {
        let commands = self.commands.lock();
        if let Some(tx) = commands.as_ref() {
            self.ready
                .store(encode_ready(ReadyState::Closing), Ordering::SeqCst);
            tx.send(WsCommand::Close).ok();
        }
    }

    fn ready_state(&self) -> ReadyState {
        decode_ready(self.ready.load(Ordering::SeqCst))
    }
}

/// Pump one connection until it closes.
async fn drive(
    uri: &str,
    mut commands: UnboundedReceiver<WsCommand>,
    events: &EventSlot,
    ready: &AtomicU8,
) {
    let sink = |events: &EventSlot| events.lock().clone();

    let stream = match connect_async(uri).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            debug!(uri, error = %err, "connect failed");
            ready.store(READY_CLOSED, Ordering::SeqCst);
            if let Some(s) = sink(events) {
                s.on_error(&err.to_string());
            }
            return;
        }
    };

    debug!(uri, "connected");
    ready.store(READY_OPEN, Ordering::SeqCst);
    if let Some(s) = sink(events) {
        s.on_open();
    }

    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WsCommand::Send(text)) => {
                    if let Err(err) = writer.send(Message::text(text)).await {
                        warn!(uri, error = %err, "send failed");
                        if let Some(s) = sink(events) {
                            s.on_error(&err.to_string());
                        }
                        break;
                    }
                }
                // A dropped handle reads as a close request.
                Some(WsCommand::Close) | None => {
                    writer.close().await.ok();
                    break;
                }
            },
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(s) = sink(events) {
                        s.on_message(text.as_str());
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .unwrap_or_default();
                    debug!(uri, reason, "closed by peer");
                    if let Some(s) = sink(events) {
                        s.on_close(&reason);
                    }
                    break;
                }
                // Protocol-level ping/pong and binary frames carry nothing
                // for the link.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(uri, error = %err, "receive failed");
                    if let Some(s) = sink(events) {
                        s.on_error(&err.to_string());
                    }
                    break;
                }
                None => {
                    debug!(uri, "stream ended");
                    if let Some(s) = sink(events) {
                        s.on_close("connection closed");
                    }
                    break;
                }
            },
        }
    }
    ready.store(READY_CLOSED, Ordering::SeqCst);
}
