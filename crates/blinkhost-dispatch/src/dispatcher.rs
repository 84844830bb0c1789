//! The dispatcher context and its call shapes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use blinkhost_proto::{DispatcherConfig, LifecycleState, ThreadKind, TraceLocation};
use blinkhost_pump::{poll_current, PumpEvent};

use crate::envelope::{Envelope, TaskOutput};
use crate::error::DispatchError;
use crate::heartbeat::HeartbeatTimer;
use crate::hooks::HookTable;
use crate::live::{LiveHandle, LiveObjects};
use crate::pump_loop::{defer_exit, LoopExit};
use crate::queue::QueueStore;
use crate::DispatchResult;

/// Routes closures between the UI, render and media threads.
///
/// Created by [`Dispatcher::start`] on the thread that becomes the UI
/// thread. All methods may be called from any thread unless noted.
pub struct Dispatcher {
    pub(crate) config: DispatcherConfig,
    pub(crate) queues: QueueStore,
    hooks: HookTable,
    heartbeat: RwLock<Option<Arc<HeartbeatTimer>>>,
    state: RwLock<LifecycleState>,
    pub(crate) exit_requested: AtomicBool,
    pub(crate) threads: Mutex<Vec<(ThreadKind, JoinHandle<()>)>>,
}

impl Dispatcher {
    pub(crate) fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            queues: QueueStore::new(),
            hooks: HookTable::new(),
            heartbeat: RwLock::new(None),
            state: RwLock::new(LifecycleState::NotStarted),
            exit_requested: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Whether shutdown has begun.
    pub fn is_exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::Acquire)
    }

    pub(crate) fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    /// Which dispatcher thread, if any, is `id`.
    pub fn classify(&self, id: thread::ThreadId) -> Option<ThreadKind> {
        self.queues.classify(id)
    }

    /// Which dispatcher thread the caller is running on.
    pub fn current_thread_kind(&self) -> Option<ThreadKind> {
        self.classify(thread::current().id())
    }

    pub fn is_current_thread(&self, kind: ThreadKind) -> bool {
        self.current_thread_kind() == Some(kind)
    }

    /// Run `f` on `kind` without waiting for it.
    ///
    /// Calls to one thread run in the order they were posted. A call to a
    /// thread that is not running is dropped.
    #[track_caller]
    pub fn post_async<F>(&self, kind: ThreadKind, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_async_at(kind, TraceLocation::caller(), f);
    }

    pub fn post_async_at<F>(&self, kind: ThreadKind, trace: TraceLocation, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(target) = self.queues.thread_of(kind) else {
            debug!(thread = %kind, %trace, "No thread serving queue, dropping call");
            return;
        };

        let envelope = Envelope::detached(
            kind,
            target.id,
            trace,
            Box::new(move || {
                f();
                Box::new(()) as TaskOutput
            }),
        );
        self.enqueue(kind, envelope);
    }

    /// Run `f` on `kind` and wait for its result.
    ///
    /// While waiting, the caller keeps servicing its own queue so the
    /// callee may call back into it. A call to the caller's own thread runs
    /// inline.
    #[track_caller]
    pub fn call_sync<R, F>(&self, kind: ThreadKind, f: F) -> DispatchResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.call_sync_at(kind, TraceLocation::caller(), f)
    }

    pub fn call_sync_at<R, F>(&self, kind: ThreadKind, trace: TraceLocation, f: F) -> DispatchResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current_thread(kind) {
            trace!(thread = %kind, %trace, "Sync call to own thread, running inline");
            return Ok(f());
        }

        let (envelope, completion) =
            Envelope::returning(kind, trace, Box::new(move || Box::new(f()) as TaskOutput));
        if !self.enqueue(kind, envelope) {
            return Err(DispatchError::ThreadUnavailable(kind));
        }

        let mut envelope = self.wait_for_completion(kind, &completion)?;
        debug_assert!(envelope.is_completed());
        envelope
            .take_result::<R>()
            .ok_or(DispatchError::ResultMismatch)
    }

    /// Run `f` on the render thread against the object behind `handle`.
    ///
    /// The handle is resolved when the call executes; if the object was
    /// removed in the meantime the call is skipped.
    #[track_caller]
    pub fn post_to_live_object<T, F>(&self, objects: &Arc<LiveObjects<T>>, handle: LiveHandle, f: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        let objects = Arc::clone(objects);
        self.post_async_at(ThreadKind::Render, TraceLocation::caller(), move || {
            match objects.resolve(handle) {
                Some(object) => f(&object),
                None => debug!(%handle, "Live object gone, skipping call"),
            }
        });
    }

    /// Post to the auxiliary runtime, which shares the UI thread.
    #[track_caller]
    pub fn post_aux<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_async_at(ThreadKind::Ui, TraceLocation::caller(), f);
    }

    /// Sync call into the auxiliary runtime, which shares the UI thread.
    #[track_caller]
    pub fn call_aux<R, F>(&self, f: F) -> DispatchResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.call_sync_at(ThreadKind::Ui, TraceLocation::caller(), f)
    }

    /// Nudge `kind`'s pump so it drains its queue.
    pub fn wake(&self, kind: ThreadKind) -> DispatchResult<()> {
        let target = self
            .queues
            .thread_of(kind)
            .ok_or(DispatchError::ThreadUnavailable(kind))?;
        target.pump.wake()?;
        Ok(())
    }

    /// Drain and run everything queued for the calling thread.
    ///
    /// Returns the number of calls run; 0 on a thread the dispatcher does
    /// not know.
    pub fn run_queued(&self) -> usize {
        match self.current_thread_kind() {
            Some(kind) => self.run_queued_on(kind),
            None => 0,
        }
    }

    /// Run the oldest call queued for the calling thread, if any.
    pub fn run_one_queued(&self) -> bool {
        let Some(kind) = self.current_thread_kind() else {
            return false;
        };
        match self.queues.pop_one(kind) {
            Some(envelope) => {
                envelope.run();
                true
            }
            None => false,
        }
    }

    /// Run the calls queued for `kind` when the drain started.
    ///
    /// Envelopes are taken from the head one at a time, so a drain nested
    /// inside a sync wait continues with the next call in line.
    pub(crate) fn run_queued_on(&self, kind: ThreadKind) -> usize {
        let budget = self.queues.len(kind);
        let mut count = 0;
        while count < budget {
            let Some(envelope) = self.queues.pop_one(kind) else {
                break;
            };
            envelope.run();
            count += 1;
        }
        count
    }

    /// Number of calls waiting for `kind`.
    pub fn queued_len(&self, kind: ThreadKind) -> usize {
        self.queues.len(kind)
    }

    /// Install the idle hook for `kind`, replacing any previous one.
    pub fn register_idle_hook<F>(&self, kind: ThreadKind, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.hooks.set_idle(kind, Box::new(hook));
    }

    /// Install the one-shot hook run on the next render loop iteration.
    pub fn register_init_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.hooks.set_init(Box::new(hook));
    }

    /// Ask the render thread for an extra pump cycle. Bursts coalesce.
    ///
    /// Returns true if this call posted the wake message.
    pub fn request_heartbeat(&self) -> bool {
        let heartbeat = self.heartbeat.read().clone();
        match heartbeat {
            Some(heartbeat) => heartbeat.trigger(),
            None => false,
        }
    }

    pub(crate) fn set_heartbeat(&self, heartbeat: Option<Arc<HeartbeatTimer>>) {
        *self.heartbeat.write() = heartbeat;
    }

    #[cfg(test)]
    pub(crate) fn has_heartbeat(&self) -> bool {
        self.heartbeat.read().is_some()
    }

    pub(crate) fn fire_heartbeat(&self) -> bool {
        let heartbeat = self.heartbeat.read().clone();
        heartbeat.is_some_and(|heartbeat| heartbeat.fire())
    }

    /// Push and wake. Returns false if the envelope was dropped.
    fn enqueue(&self, kind: ThreadKind, envelope: Envelope) -> bool {
        let Some(pump) = self.queues.push(kind, envelope) else {
            return false;
        };
        if let Err(e) = pump.wake() {
            warn!(thread = %kind, "Failed to wake thread: {}", e);
        }
        true
    }

    fn wait_for_completion(
        &self,
        kind: ThreadKind,
        completion: &Receiver<Envelope>,
    ) -> DispatchResult<Envelope> {
        let own = self.current_thread_kind();
        let interval = self.config.sync_poll_interval();

        loop {
            if let Some(own) = own {
                self.service_while_waiting(own);
            }
            match completion.recv_timeout(interval) {
                Ok(envelope) => return Ok(envelope),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DispatchError::ThreadUnavailable(kind));
                }
            }
        }
    }

    /// Process the caller's pending native messages and its own queue
    /// while it is blocked on another thread.
    ///
    /// This may run arbitrary queued closures, including engine work, on
    /// the waiting thread.
    pub(crate) fn service_while_waiting(&self, own: ThreadKind) {
        loop {
            match poll_current() {
                Ok(Some(PumpEvent::Quit(request))) => defer_exit(LoopExit::Quit(request)),
                Ok(Some(PumpEvent::Closed)) => defer_exit(LoopExit::Closed),
                Ok(Some(PumpEvent::Heartbeat)) => {
                    self.fire_heartbeat();
                }
                Ok(Some(PumpEvent::Wake)) | Ok(Some(PumpEvent::Dispatched)) => {}
                Ok(None) => break,
                Err(e) => {
                    trace!(thread = %own, "No pump to service while waiting: {}", e);
                    break;
                }
            }
        }
        self.run_queued_on(own);
    }

    pub(crate) fn transition_to(&self, new_state: LifecycleState) {
        let previous = {
            let mut state = self.state.write();
            let prev = *state;
            *state = new_state;
            prev
        };

        if previous.next() != Some(new_state) {
            warn!(
                previous = %previous.name(),
                current = %new_state.name(),
                "Unexpected lifecycle transition"
            );
        }

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );
    }
}
