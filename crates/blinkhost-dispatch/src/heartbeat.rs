//! Out-of-band wake requests for the render pump.
//!
//! The engine may ask for a pump cycle from any thread while nothing else is
//! queued. Requests are counted and only the first one after a delivery posts
//! a native message, so a burst collapses into a single wake.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, ThreadId};

use tracing::{trace, warn};

use blinkhost_pump::PumpHandle;

/// Coalescing heartbeat bound to one pump thread.
pub struct HeartbeatTimer {
    pending: AtomicU32,
    owner: ThreadId,
    pump: PumpHandle,
}

impl HeartbeatTimer {
    /// Create a heartbeat on the calling thread, posting to `pump`.
    pub fn new(pump: PumpHandle) -> Self {
        Self {
            pending: AtomicU32::new(0),
            owner: thread::current().id(),
            pump,
        }
    }

    /// Request a pump cycle. Callable from any thread.
    ///
    /// Returns true if this call posted the heartbeat message.
    pub fn trigger(&self) -> bool {
        if self.pending.fetch_add(1, Ordering::AcqRel) != 0 {
            return false;
        }

        if let Err(e) = self.pump.heartbeat() {
            warn!("Failed to post heartbeat: {}", e);
            self.pending.store(0, Ordering::Release);
            return false;
        }

        trace!("Heartbeat posted");
        true
    }

    /// Accept a delivered heartbeat on the pump thread and re-arm.
    ///
    /// Returns false, leaving the counter untouched, if called from any
    /// other thread.
    pub fn fire(&self) -> bool {
        if thread::current().id() != self.owner {
            warn!(owner = ?self.owner, "Heartbeat delivered on foreign thread, ignoring");
            return false;
        }

        let coalesced = self.pending.swap(0, Ordering::AcqRel);
        trace!(coalesced, "Heartbeat fired");
        true
    }

    /// Requests received since the last delivery.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Thread the heartbeat was created on.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }
}
