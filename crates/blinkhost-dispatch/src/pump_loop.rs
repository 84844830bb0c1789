//! The per-thread pump loop.
//!
//! Every dispatcher thread runs the same cycle: hooks and engine tasks,
//! drain the queue, engine idle work, then block for one native message.
//! A quit that arrives while the thread is inside a nested sync wait cannot
//! unwind the outer loop directly, so it is parked in a thread-local slot
//! and picked up after the next drain.

use std::cell::RefCell;

use tracing::{debug, error, trace};

use blinkhost_proto::{PumpPhase, ThreadKind};
use blinkhost_pump::{wait_current, PumpError, PumpEvent, QuitRequest};

use crate::dispatcher::Dispatcher;
use crate::engine::RenderEngine;

/// Why a pump loop stopped.
#[derive(Debug)]
pub(crate) enum LoopExit {
    /// A quit message arrived; acknowledge it once teardown is done.
    Quit(QuitRequest),

    /// The native queue was closed by the OS.
    Closed,

    /// Waiting on the native queue failed.
    Failed(PumpError),
}

thread_local! {
    static DEFERRED_EXIT: RefCell<Option<LoopExit>> = const { RefCell::new(None) };
}

/// Park an exit for the outer loop. The first exit wins.
pub(crate) fn defer_exit(exit: LoopExit) {
    DEFERRED_EXIT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            debug!(?exit, "Exit already pending, dropping duplicate");
            return;
        }
        *slot = Some(exit);
    });
}

pub(crate) fn take_deferred_exit() -> Option<LoopExit> {
    DEFERRED_EXIT.with(|slot| slot.borrow_mut().take())
}

pub(crate) struct PumpLoop<'a> {
    dispatcher: &'a Dispatcher,
    kind: ThreadKind,
    engine: Option<Box<dyn RenderEngine>>,
    phase: PumpPhase,
}

impl<'a> PumpLoop<'a> {
    pub fn new(
        dispatcher: &'a Dispatcher,
        kind: ThreadKind,
        engine: Option<Box<dyn RenderEngine>>,
    ) -> Self {
        Self {
            dispatcher,
            kind,
            engine,
            phase: PumpPhase::Running,
        }
    }

    pub fn phase(&self) -> PumpPhase {
        self.phase
    }

    /// Hand the engine back for shutdown.
    pub fn into_engine(self) -> Option<Box<dyn RenderEngine>> {
        self.engine
    }

    /// Run until a quit arrives or the native queue fails.
    pub fn run(&mut self) -> LoopExit {
        debug!(thread = %self.kind, "Pump loop starting");

        let exit = loop {
            if let Some(exit) = self.step() {
                break exit;
            }
            self.phase = self.phase.next().unwrap_or(PumpPhase::Exited);
        };

        self.phase = PumpPhase::Exited;
        debug!(thread = %self.kind, phase = self.phase().name(), ?exit, "Pump loop exited");
        exit
    }

    fn step(&mut self) -> Option<LoopExit> {
        match self.phase {
            PumpPhase::Running => {
                if self.kind == ThreadKind::Render && self.dispatcher.hooks().run_init() {
                    debug!("Render init hook ran");
                }
                self.dispatcher.hooks().run_idle(self.kind);
                if let Some(engine) = self.engine.as_mut() {
                    engine.run_pending_tasks();
                }
                None
            }
            PumpPhase::Draining => {
                let ran = self.dispatcher.run_queued_on(self.kind);
                if ran > 0 {
                    trace!(thread = %self.kind, ran, "Queue drained");
                }
                take_deferred_exit()
            }
            PumpPhase::EngineIdle => {
                self.run_engine_idle();
                None
            }
            PumpPhase::NativeMessageWait => self.wait_for_message(),
            PumpPhase::Exited => Some(LoopExit::Closed),
        }
    }

    fn wait_for_message(&mut self) -> Option<LoopExit> {
        match wait_current() {
            Ok(PumpEvent::Wake) | Ok(PumpEvent::Dispatched) => {}
            Ok(PumpEvent::Heartbeat) => {
                if self.dispatcher.fire_heartbeat() {
                    self.run_engine_idle();
                    self.dispatcher.run_queued_on(self.kind);
                }
            }
            Ok(PumpEvent::Quit(request)) => {
                debug!(thread = %self.kind, requester = ?request.requester, "Quit received");
                defer_exit(LoopExit::Quit(request));
            }
            Ok(PumpEvent::Closed) => defer_exit(LoopExit::Closed),
            Err(e) => {
                error!(thread = %self.kind, "Native message wait failed: {}", e);
                return Some(LoopExit::Failed(e));
            }
        }
        None
    }

    fn run_engine_idle(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.run_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use blinkhost_proto::DispatcherConfig;
    use blinkhost_pump::{install, uninstall, ChannelPump, PumpHandle};

    use crate::heartbeat::HeartbeatTimer;

    struct IdleCounter(Arc<AtomicUsize>);

    impl RenderEngine for IdleCounter {
        fn run_idle(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn with_render_pump<F>(f: F)
    where
        F: FnOnce(&Dispatcher, PumpHandle) + Send + 'static,
    {
        thread::spawn(move || {
            let dispatcher = Dispatcher::new(DispatcherConfig::default());
            let pump = install(Box::new(ChannelPump::new())).unwrap();
            assert!(dispatcher
                .queues
                .register(ThreadKind::Render, thread::current().id(), pump.clone()));

            f(&dispatcher, pump);

            dispatcher.queues.unregister(ThreadKind::Render);
            uninstall();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_quit_drains_then_exits() {
        with_render_pump(|dispatcher, pump| {
            let ran = Arc::new(AtomicUsize::new(0));
            for _ in 0..3 {
                let ran = Arc::clone(&ran);
                dispatcher.post_async(ThreadKind::Render, move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                });
            }

            let flag = Arc::new(AtomicBool::new(false));
            pump.quit(QuitRequest::new(Arc::clone(&flag))).unwrap();

            let idles = Arc::new(AtomicUsize::new(0));
            let engine: Box<dyn RenderEngine> = Box::new(IdleCounter(Arc::clone(&idles)));
            let mut pump_loop = PumpLoop::new(dispatcher, ThreadKind::Render, Some(engine));

            match pump_loop.run() {
                LoopExit::Quit(request) => request.acknowledge(),
                other => panic!("expected quit, got {:?}", other),
            }

            assert_eq!(pump_loop.phase(), PumpPhase::Exited);
            assert_eq!(ran.load(Ordering::SeqCst), 3);
            assert!(idles.load(Ordering::SeqCst) >= 1);
            assert!(flag.load(Ordering::Acquire));
            assert!(pump_loop.into_engine().is_some());
        });
    }

    #[test]
    fn test_heartbeat_runs_engine_idle() {
        with_render_pump(|dispatcher, pump| {
            let heartbeat = Arc::new(HeartbeatTimer::new(pump.clone()));
            dispatcher.set_heartbeat(Some(Arc::clone(&heartbeat)));

            assert!(dispatcher.request_heartbeat());
            assert!(!dispatcher.request_heartbeat());
            pump.quit(QuitRequest::new(Arc::new(AtomicBool::new(false))))
                .unwrap();

            let idles = Arc::new(AtomicUsize::new(0));
            let engine: Box<dyn RenderEngine> = Box::new(IdleCounter(Arc::clone(&idles)));
            let mut pump_loop = PumpLoop::new(dispatcher, ThreadKind::Render, Some(engine));
            pump_loop.run();

            assert_eq!(heartbeat.pending(), 0);
            // One idle per loop pass plus one for the heartbeat.
            assert!(idles.load(Ordering::SeqCst) >= 3);
            dispatcher.set_heartbeat(None);
        });
    }

    #[test]
    fn test_first_deferred_exit_wins() {
        thread::spawn(|| {
            defer_exit(LoopExit::Closed);
            defer_exit(LoopExit::Quit(QuitRequest::new(Arc::new(AtomicBool::new(false)))));

            assert!(matches!(take_deferred_exit(), Some(LoopExit::Closed)));
            assert!(take_deferred_exit().is_none());
        })
        .join()
        .unwrap();
    }
}
