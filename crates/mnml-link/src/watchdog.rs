//! Liveness watchdog.
//!
//! The server advertises how often heartbeats will arrive; the watchdog
//! declares the connection dead when silence stretches past one and a half
//! advertised intervals. There is never more than one live deadline: each
//! heartbeat bumps the generation, turning any previously scheduled check
//! into a no-op before the new one is installed.

use std::time::{Duration, Instant};

/// Fallback interval until a heartbeat advertises one.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A single-shot deadline to install, tagged with the generation that keeps
/// it unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arming {
    /// Generation the deadline check must present to be honored.
    pub generation: u64,
    /// Delay until the check should run.
    pub delay: Duration,
}

/// Tracks heartbeat arrival and decides when the connection is dead.
#[derive(Debug)]
pub struct Watchdog {
    interval: Duration,
    last_heartbeat_at: Option<Instant>,
    generation: u64,
    armed: bool,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            last_heartbeat_at: None,
            generation: 0,
            armed: false,
        }
    }
}

impl Watchdog {
    /// Create a disarmed watchdog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat and re-arm.
    ///
    /// `interval` is the advertised interval when one was extractable; a
    /// malformed heartbeat keeps the prior interval. The returned [`Arming`]
    /// supersedes any pending deadline: its generation invalidates older
    /// checks.
    pub fn observe_heartbeat(&mut self, now: Instant, interval: Option<Duration>) -> Arming {
        if let Some(interval) = interval {
            self.interval = interval;
        }
        self.last_heartbeat_at = Some(now);
        self.generation += 1;
        self.armed = true;
        Arming {
            generation: self.generation,
            delay: tolerance(self.interval),
        }
    }

    /// Cancel any pending deadline. Stale checks see a generation mismatch.
    pub fn disarm(&mut self) {
        self.generation += 1;
        self.armed = false;
    }

    /// Whether the deadline check tagged `generation` finds the connection
    /// dead at `now`.
    pub fn expired(&self, now: Instant, generation: u64) -> bool {
        self.armed
            && generation == self.generation
            && self
                .last_heartbeat_at
                .is_some_and(|at| now >= at + tolerance(self.interval))
    }

    /// Currently advertised heartbeat interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Silence tolerated before the connection is declared dead.
fn tolerance(interval: Duration) -> Duration {
    interval + interval / 2
}
