//! Per-thread task queues.
//!
//! One mutex guards every queue together with the identity of the thread
//! that owns it. A push therefore either lands in a queue whose thread is
//! still registered or is dropped; it can never slip in after the owning
//! thread took its final snapshot.

use std::collections::VecDeque;
use std::thread::ThreadId;

use parking_lot::Mutex;
use tracing::{debug, trace};

use blinkhost_proto::{ThreadKind, THREAD_KIND_COUNT};
use blinkhost_pump::PumpHandle;

use crate::envelope::Envelope;

/// Identity and wake handle of a thread serving a queue.
#[derive(Debug, Clone)]
pub(crate) struct RegisteredThread {
    pub id: ThreadId,
    pub pump: PumpHandle,
}

#[derive(Default)]
struct ThreadSlot {
    owner: Option<RegisteredThread>,
    tasks: VecDeque<Envelope>,
}

pub(crate) struct QueueStore {
    slots: Mutex<[ThreadSlot; THREAD_KIND_COUNT]>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(std::array::from_fn(|_| ThreadSlot::default())),
        }
    }

    /// Record `id` as the thread serving `kind`. Returns false if the slot
    /// is already taken.
    pub fn register(&self, kind: ThreadKind, id: ThreadId, pump: PumpHandle) -> bool {
        let mut slots = self.slots.lock();
        let slot = &mut slots[kind.index()];
        if slot.owner.is_some() {
            return false;
        }
        slot.owner = Some(RegisteredThread { id, pump });
        debug!(thread = %kind, ?id, "Thread registered");
        true
    }

    /// Forget the thread serving `kind` and hand back whatever was still
    /// queued for it. Later pushes to `kind` are dropped.
    pub fn unregister(&self, kind: ThreadKind) -> VecDeque<Envelope> {
        let mut slots = self.slots.lock();
        let slot = &mut slots[kind.index()];
        slot.owner = None;
        debug!(thread = %kind, leftover = slot.tasks.len(), "Thread unregistered");
        std::mem::take(&mut slot.tasks)
    }

    pub fn classify(&self, id: ThreadId) -> Option<ThreadKind> {
        let slots = self.slots.lock();
        ThreadKind::ALL.into_iter().find(|kind| {
            slots[kind.index()]
                .owner
                .as_ref()
                .is_some_and(|owner| owner.id == id)
        })
    }

    pub fn thread_of(&self, kind: ThreadKind) -> Option<RegisteredThread> {
        self.slots.lock()[kind.index()].owner.clone()
    }

    /// Append `envelope` to the queue for `kind`.
    ///
    /// Returns the pump to wake, or `None` if no thread serves `kind`, in
    /// which case the envelope has been dropped.
    pub fn push(&self, kind: ThreadKind, envelope: Envelope) -> Option<PumpHandle> {
        let mut slots = self.slots.lock();
        let slot = &mut slots[kind.index()];

        let Some(owner) = slot.owner.as_ref() else {
            drop(slots);
            debug!(thread = %kind, trace = %envelope.trace(), "No thread serving queue, dropping call");
            return None;
        };

        let pump = owner.pump.clone();
        slot.tasks.push_back(envelope);
        trace!(thread = %kind, queued = slot.tasks.len(), "Envelope queued");
        Some(pump)
    }

    /// Remove the oldest envelope queued for `kind`.
    pub fn pop_one(&self, kind: ThreadKind) -> Option<Envelope> {
        self.slots.lock()[kind.index()].tasks.pop_front()
    }

    pub fn len(&self, kind: ThreadKind) -> usize {
        self.slots.lock()[kind.index()].tasks.len()
    }
}
