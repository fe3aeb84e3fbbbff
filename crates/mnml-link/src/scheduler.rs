//! Host scheduler collaborator.
//!
//! The host is single-threaded and cooperative: all recompute passes execute
//! sequentially on its thread, and the scheduler is its deferred-execution
//! primitive. Enqueueing deferred work is the only operation a transport
//! callback thread may perform against the host; the remaining methods are
//! called exclusively from the host thread during a recompute pass.

use std::time::Duration;

use crate::error::Severity;

/// Deferred work enqueued onto the host thread.
pub type DeferredFn = Box<dyn FnOnce() + Send + 'static>;

/// The host's deferred-execution and diagnostics surface.
pub trait Scheduler: Send + Sync {
    /// Enqueue `work` to run on the host thread after `delay`.
    ///
    /// Safe to call from any thread; this is the only sanctioned
    /// cross-thread operation against the host.
    fn schedule_deferred(&self, delay: Duration, work: DeferredFn);

    /// Mark the owning component's result expired so the host re-solves it.
    ///
    /// Host thread only; deferred work calls this to trigger a recompute.
    fn expire_result(&self);

    /// Attach a diagnostic to the owning component. Host thread only.
    fn add_diagnostic(&self, severity: Severity, text: &str);

    /// Clear all diagnostics from the owning component. Host thread only.
    fn clear_diagnostics(&self);
}
