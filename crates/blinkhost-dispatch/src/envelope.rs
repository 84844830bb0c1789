//! Task envelopes.
//!
//! An envelope carries one closure to its target thread together with the
//! bookkeeping that decides which thread destroys it. Ownership moves with
//! the envelope: an async envelope is consumed on the target right after it
//! runs, a sync envelope is sent back to the waiting caller and destroyed
//! there.

use std::any::Any;
use std::fmt;
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, trace};

use blinkhost_proto::{ThreadKind, TraceLocation};

use crate::error::InvariantViolation;

/// Opaque value produced by a task.
pub(crate) type TaskOutput = Box<dyn Any + Send>;

/// Type-erased closure executed on the target thread.
pub(crate) type Task = Box<dyn FnOnce() -> TaskOutput + Send>;

pub(crate) struct Envelope {
    task: Option<Task>,
    completed: bool,
    result: Option<TaskOutput>,
    owner_thread: ThreadId,
    target: ThreadKind,
    destroy_thread: ThreadId,
    reply: Option<Sender<Envelope>>,
    trace: TraceLocation,
}

impl Envelope {
    /// Envelope for an async call. It destroys itself on `target_thread`.
    pub fn detached(
        target: ThreadKind,
        target_thread: ThreadId,
        trace: TraceLocation,
        task: Task,
    ) -> Self {
        Self {
            task: Some(task),
            completed: false,
            result: None,
            owner_thread: thread::current().id(),
            target,
            destroy_thread: target_thread,
            reply: None,
            trace,
        }
    }

    /// Envelope for a sync call. After running it is sent back through the
    /// returned receiver and destroyed by the calling thread.
    pub fn returning(
        target: ThreadKind,
        trace: TraceLocation,
        task: Task,
    ) -> (Self, Receiver<Envelope>) {
        let (reply, completion) = crossbeam_channel::bounded(1);
        let caller = thread::current().id();

        let envelope = Self {
            task: Some(task),
            completed: false,
            result: None,
            owner_thread: caller,
            target,
            destroy_thread: caller,
            reply: Some(reply),
            trace,
        };
        (envelope, completion)
    }

    pub fn trace(&self) -> TraceLocation {
        self.trace
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Execute the closure on the calling thread and hand the envelope to
    /// whichever thread owns its destruction.
    pub fn run(mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        trace!(target_thread = %self.target, trace = %self.trace, "Running envelope");
        self.result = Some(task());
        self.completed = true;

        if let Some(reply) = self.reply.take() {
            if let Err(unsent) = reply.send(self) {
                // The caller is gone; the envelope is now dropped here, on
                // the wrong thread, which trips the destroy check.
                error!(trace = %unsent.0.trace, "Sync caller vanished before completion");
            }
        }
    }

    /// Move the result out of the envelope.
    pub fn take_result<R: 'static>(&mut self) -> Option<R> {
        self.result
            .take()?
            .downcast::<R>()
            .ok()
            .map(|value| *value)
    }

    /// Check that `thread` is allowed to destroy this envelope.
    pub fn verify_destroy_on(&self, thread: ThreadId) -> Result<(), InvariantViolation> {
        if thread == self.destroy_thread {
            Ok(())
        } else {
            Err(InvariantViolation {
                trace: self.trace,
                expected: self.destroy_thread,
                actual: thread,
            })
        }
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if !self.completed {
            // Never ran: dropped for an unregistered target or discarded
            // at teardown.
            trace!(trace = %self.trace, target_thread = %self.target, "Discarding unrun envelope");
            return;
        }

        if let Err(violation) = self.verify_destroy_on(thread::current().id()) {
            error!(%violation, owner = ?self.owner_thread, "Envelope ownership violated");
            std::process::abort();
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("target", &self.target)
            .field("completed", &self.completed)
            .field("owner_thread", &self.owner_thread)
            .field("destroy_thread", &self.destroy_thread)
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn here() -> TraceLocation {
        blinkhost_proto::trace_location!()
    }

    #[test]
    fn test_detached_runs_and_self_destroys() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let envelope = Envelope::detached(
            ThreadKind::Render,
            thread::current().id(),
            here(),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(()) as TaskOutput
            }),
        );
        envelope.run();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_returning_sends_result_back_to_caller() {
        let (envelope, completion) = Envelope::returning(
            ThreadKind::Render,
            here(),
            Box::new(|| Box::new(2 + 2) as TaskOutput),
        );

        thread::spawn(move || envelope.run()).join().unwrap();

        let mut returned = completion.recv().unwrap();
        assert!(returned.is_completed());
        assert_eq!(returned.take_result::<i32>(), Some(4));
    }

    #[test]
    fn test_result_type_mismatch() {
        let (envelope, completion) = Envelope::returning(
            ThreadKind::Ui,
            here(),
            Box::new(|| Box::new("text") as TaskOutput),
        );
        envelope.run();

        let mut returned = completion.recv().unwrap();
        assert_eq!(returned.take_result::<u64>(), None);
    }

    #[test]
    fn test_verify_destroy_thread() {
        let (envelope, _completion) = Envelope::returning(
            ThreadKind::Render,
            here(),
            Box::new(|| Box::new(()) as TaskOutput),
        );

        assert!(envelope.verify_destroy_on(thread::current().id()).is_ok());

        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        let violation = envelope.verify_destroy_on(other).unwrap_err();
        assert_eq!(violation.actual, other);
        assert_eq!(violation.expected, thread::current().id());
    }

    #[test]
    fn test_unrun_envelope_drops_anywhere() {
        let (envelope, completion) = Envelope::returning(
            ThreadKind::Render,
            here(),
            Box::new(|| Box::new(()) as TaskOutput),
        );

        thread::spawn(move || drop(envelope)).join().unwrap();

        // The reply sender went with the envelope.
        assert!(completion.recv().is_err());
    }
}
