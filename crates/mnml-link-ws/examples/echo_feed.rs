//! Minimal host loop around a link.
//!
//! Connects to a WebSocket endpoint and prints every message that arrives,
//! reconnecting automatically when the server goes away. Start any local
//! WebSocket server (e.g. `websocat -s 9000`) and run:
//!
//! ```text
//! cargo run -p mnml-link-ws --example echo_feed -- localhost 9000
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use mnml_link::{ConnectionManager, DeferredFn, EndpointConfig, Scheduler, Severity};
use mnml_link_ws::WsTransport;

/// A toy single-threaded host: deferred work runs on the main loop, and an
/// expired result means "run `ensure` again on the next tick".
#[derive(Default)]
struct LoopScheduler {
    queue: Mutex<Vec<(Instant, DeferredFn)>>,
    dirty: AtomicBool,
}

impl LoopScheduler {
    /// Run every deferred callback whose delay has elapsed.
    fn run_due(&self) {
        let now = Instant::now();
        let due: Vec<DeferredFn> = {
            let mut queue = self.queue.lock();
            let mut due = Vec::new();
            let mut index = 0;
            while index < queue.len() {
                if queue[index].0 <= now {
                    due.push(queue.swap_remove(index).1);
                } else {
                    index += 1;
                }
            }
            due
        };
        for work in due {
            work();
        }
    }

    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}

impl Scheduler for LoopScheduler {
    fn schedule_deferred(&self, delay: Duration, work: DeferredFn) {
        self.queue.lock().push((Instant::now() + delay, work));
    }

    fn expire_result(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn add_diagnostic(&self, severity: Severity, text: &str) {
        eprintln!("[{severity}] {text}");
    }

    fn clear_diagnostics(&self) {}
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port = args
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9000u16);

    let scheduler = Arc::new(LoopScheduler::default());
    let mut manager = ConnectionManager::new(
        Arc::new(WsTransport::new()),
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
    );
    let config = EndpointConfig::new().host(host).port(port);

    scheduler.expire_result();
    loop {
        scheduler.run_due();
        if scheduler.take_dirty() {
            let out = manager.ensure(&config);
            println!("state: {}", manager.state());
            if let Some(message) = out.message {
                println!("message: {message}");
            }
        }
        thread::sleep(Duration::from_millis(50));
    }
}
