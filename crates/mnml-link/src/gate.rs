//! Outbound message gating.
//!
//! A send pass runs on every recompute cycle, but most cycles carry the same
//! message as the last one. The [`MessageGate`] remembers the logical inputs
//! of the last issued send and suppresses duplicates; `force` overrides the
//! comparison and an upstream feed replacement resets it.

use crate::envelope::{format_outbound, Outbound};
use crate::error::{LinkError, LinkResult, Severity};
use crate::scheduler::Scheduler;
use crate::transport::TransportHandle;

/// Logical inputs of the last issued send.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GateSnapshot {
    content: String,
    broadcast: bool,
}

/// Change-detection gate in front of the transport's send.
///
/// A send is issued iff the content or the broadcast flag differ from the
/// previous send, or the caller forces one. The snapshot records the logical
/// inputs, not the serialized bytes, so re-encoding details never defeat the
/// comparison.
#[derive(Debug, Default)]
pub struct MessageGate {
    last_sent: Option<GateSnapshot>,
}

impl MessageGate {
    /// Create a gate with no send history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the last send, so the next offer always issues.
    ///
    /// Call this whenever the upstream source feeding `content` is
    /// reconnected or replaced: the next identical-looking value must still
    /// be treated as new.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }

    /// Decide whether to issue a send for these inputs.
    ///
    /// Returns the formatted payload when a send should go out, updating the
    /// snapshot; returns `None` when the inputs match the previous send and
    /// `force` is not set.
    pub fn offer(&mut self, content: &str, broadcast: bool, force: bool) -> Option<Outbound> {
        let unchanged = self
            .last_sent
            .as_ref()
            .is_some_and(|s| s.content == content && s.broadcast == broadcast);
        if unchanged && !force {
            return None;
        }
        let outbound = format_outbound(content, broadcast);
        self.last_sent = Some(GateSnapshot {
            content: content.to_owned(),
            broadcast,
        });
        Some(outbound)
    }

    /// Drive one full send cycle on the host thread.
    ///
    /// Gates the inputs, surfaces the parse-fallback remark, and transmits
    /// the payload. Returns the transmitted payload for republication, or
    /// `Ok(None)` when the gate withheld the send.
    pub fn send_through(
        &mut self,
        handle: &dyn TransportHandle,
        scheduler: &dyn Scheduler,
        content: &str,
        broadcast: bool,
        force: bool,
    ) -> LinkResult<Option<Outbound>> {
        let Some(outbound) = self.offer(content, broadcast, force) else {
            return Ok(None);
        };
        if outbound.raw_fallback {
            let note = LinkError::PayloadParse(content.to_owned());
            scheduler.add_diagnostic(Severity::Remark, &note.to_string());
        }
        handle.send(&outbound.payload)?;
        Ok(Some(outbound))
    }
}
