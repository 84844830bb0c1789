//! Starting and stopping the dispatcher threads.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use blinkhost_proto::{DispatcherConfig, LifecycleState, ThreadKind};
use blinkhost_pump::{create_os_pump, install, uninstall, QuitRequest};

use crate::dispatcher::Dispatcher;
use crate::engine::EngineFactory;
use crate::error::DispatchError;
use crate::heartbeat::HeartbeatTimer;
use crate::pump_loop::{take_deferred_exit, LoopExit, PumpLoop};
use crate::DispatchResult;

const STARTUP_PENDING: u8 = 0;
const STARTUP_READY: u8 = 1;
const STARTUP_FAILED: u8 = 2;

/// Flag a starting thread raises once it is registered and serving.
struct StartupSignal {
    status: AtomicU8,
    error: Mutex<Option<String>>,
}

impl StartupSignal {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(STARTUP_PENDING),
            error: Mutex::new(None),
        }
    }

    fn ready(&self) {
        self.status.store(STARTUP_READY, Ordering::Release);
    }

    fn fail(&self, message: impl Into<String>) {
        *self.error.lock() = Some(message.into());
        self.status.store(STARTUP_FAILED, Ordering::Release);
    }

    fn status(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    fn take_error(&self) -> String {
        self.error
            .lock()
            .take()
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

impl Dispatcher {
    /// Start the dispatcher. The calling thread becomes the UI thread.
    ///
    /// Returns once the render thread (and the media thread, if enabled)
    /// has built its pump, initialized the engine and registered itself.
    #[instrument(name = "dispatcher_start", skip(config, engine))]
    pub fn start(config: DispatcherConfig, engine: EngineFactory) -> DispatchResult<Arc<Self>> {
        let dispatcher = Arc::new(Self::new(config));
        dispatcher.transition_to(LifecycleState::Starting);

        let ui_pump = install(create_os_pump()?)?;
        if !dispatcher
            .queues
            .register(ThreadKind::Ui, thread::current().id(), ui_pump)
        {
            uninstall();
            return Err(DispatchError::AlreadyStarted);
        }

        if let Err(e) = dispatcher.start_workers(engine) {
            error!("Dispatcher startup failed: {}", e);
            dispatcher.teardown();
            return Err(e);
        }

        dispatcher.transition_to(LifecycleState::Ready);
        dispatcher.transition_to(LifecycleState::Running);
        info!(
            media = dispatcher.config.enable_media_thread,
            heartbeat = dispatcher.config.heartbeat_enabled,
            "Dispatcher running"
        );
        Ok(dispatcher)
    }

    fn start_workers(self: &Arc<Self>, engine: EngineFactory) -> DispatchResult<()> {
        let render_name = self.config.render_thread_name.clone();
        self.spawn_worker(ThreadKind::Render, render_name, Some(engine))?;

        if self.config.enable_media_thread {
            let media_name = self.config.media_thread_name.clone();
            self.spawn_worker(ThreadKind::Media, media_name, None)?;
        }
        Ok(())
    }

    fn spawn_worker(
        self: &Arc<Self>,
        kind: ThreadKind,
        name: String,
        engine: Option<EngineFactory>,
    ) -> DispatchResult<()> {
        let startup = Arc::new(StartupSignal::new());
        let dispatcher = Arc::clone(self);
        let signal = Arc::clone(&startup);

        debug!(thread = %kind, %name, "Spawning thread");
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker_thread_main(dispatcher, kind, engine, signal))
            .map_err(DispatchError::Spawn)?;

        let outcome = self.wait_for_startup(kind, &handle, &startup);
        self.threads.lock().push((kind, handle));
        outcome
    }

    /// Spin, then sleep, until the thread reports in.
    fn wait_for_startup(
        &self,
        kind: ThreadKind,
        handle: &JoinHandle<()>,
        startup: &StartupSignal,
    ) -> DispatchResult<()> {
        let budget = self.config.startup_spin_budget;
        let mut spins = 0u32;

        loop {
            match startup.status() {
                STARTUP_READY => {
                    debug!(thread = %kind, spins, "Thread reported ready");
                    return Ok(());
                }
                STARTUP_FAILED => {
                    return Err(DispatchError::StartupFailed {
                        thread: kind,
                        message: startup.take_error(),
                    });
                }
                _ => {}
            }

            if handle.is_finished() && startup.status() == STARTUP_PENDING {
                return Err(DispatchError::StartupFailed {
                    thread: kind,
                    message: "thread exited before reporting ready".to_string(),
                });
            }

            if spins < budget {
                spins += 1;
                std::hint::spin_loop();
            } else {
                thread::sleep(self.config.startup_poll_interval());
            }
        }
    }

    /// Stop every thread and tear down the UI side.
    ///
    /// Must be called on the UI thread. Queued calls are run before each
    /// thread exits, and the render engine is shut down before this
    /// returns. Calling it again after it completed is a no-op.
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub fn shutdown(&self) -> DispatchResult<()> {
        let state = self.state();
        if state == LifecycleState::Exited {
            return Ok(());
        }
        if !state.is_serving() && !state.is_shutting_down() {
            return Err(DispatchError::NotStarted);
        }

        if !self.is_current_thread(ThreadKind::Ui) {
            return Err(DispatchError::WrongThread {
                expected: ThreadKind::Ui,
            });
        }

        if self.exit_requested.swap(true, Ordering::AcqRel) {
            debug!("Shutdown already in progress");
            return Ok(());
        }

        info!("Dispatcher shutting down");
        self.transition_to(LifecycleState::ExitRequested);
        self.teardown();
        self.transition_to(LifecycleState::Exited);
        info!("Dispatcher stopped");
        Ok(())
    }

    fn teardown(&self) {
        for kind in [ThreadKind::Media, ThreadKind::Render] {
            self.stop_worker(kind);
        }

        let threads = std::mem::take(&mut *self.threads.lock());
        for (kind, handle) in threads {
            if handle.join().is_err() {
                error!(thread = %kind, "Thread panicked");
            }
        }

        for envelope in self.queues.unregister(ThreadKind::Ui) {
            envelope.run();
        }
        uninstall();
        if let Some(LoopExit::Quit(request)) = take_deferred_exit() {
            request.acknowledge();
        }
    }

    /// Post a quit to `kind` and keep the UI serviced until it confirms.
    fn stop_worker(&self, kind: ThreadKind) {
        let Some(target) = self.queues.thread_of(kind) else {
            return;
        };

        let exit_flag = Arc::new(AtomicBool::new(false));
        if let Err(e) = target.pump.quit(QuitRequest::new(Arc::clone(&exit_flag))) {
            warn!(thread = %kind, "Failed to post quit: {}", e);
            return;
        }

        let poll_interval = self.config.shutdown_poll_interval();
        while !exit_flag.load(Ordering::Acquire) {
            self.service_while_waiting(ThreadKind::Ui);
            if self.worker_finished(kind) {
                warn!(thread = %kind, "Thread ended without acknowledging quit");
                break;
            }
            let _ = target.pump.wake();
            thread::sleep(poll_interval);
        }
        info!(thread = %kind, "Thread exited");
    }

    fn worker_finished(&self, kind: ThreadKind) -> bool {
        self.threads
            .lock()
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(true, |(_, handle)| handle.is_finished())
    }

    /// Run the UI pump loop on the calling thread until
    /// [`stop_ui_loop`](Self::stop_ui_loop) is called.
    pub fn run_ui_loop(&self) -> DispatchResult<()> {
        if !self.is_current_thread(ThreadKind::Ui) {
            return Err(DispatchError::WrongThread {
                expected: ThreadKind::Ui,
            });
        }

        let mut pump_loop = PumpLoop::new(self, ThreadKind::Ui, None);
        match pump_loop.run() {
            LoopExit::Quit(request) => {
                request.acknowledge();
                Ok(())
            }
            LoopExit::Closed => Ok(()),
            LoopExit::Failed(e) => Err(e.into()),
        }
    }

    /// Ask the UI pump loop to return. Callable from any thread.
    pub fn stop_ui_loop(&self) -> DispatchResult<()> {
        let ui = self
            .queues
            .thread_of(ThreadKind::Ui)
            .ok_or(DispatchError::ThreadUnavailable(ThreadKind::Ui))?;
        ui.pump.quit(QuitRequest::new(Arc::new(AtomicBool::new(false))))?;
        Ok(())
    }
}

#[instrument(name = "dispatcher_thread", skip(dispatcher, engine, startup))]
fn worker_thread_main(
    dispatcher: Arc<Dispatcher>,
    kind: ThreadKind,
    engine: Option<EngineFactory>,
    startup: Arc<StartupSignal>,
) {
    let pump = match create_os_pump().and_then(install) {
        Ok(pump) => pump,
        Err(e) => {
            error!(thread = %kind, "Failed to create message pump: {}", e);
            startup.fail(e.to_string());
            return;
        }
    };

    let mut engine = engine.map(|factory| factory());
    if let Some(engine) = engine.as_mut() {
        engine.initialize();
        debug!("Engine initialized");
    }

    if !dispatcher
        .queues
        .register(kind, thread::current().id(), pump.clone())
    {
        startup.fail(format!("{} thread already registered", kind));
        uninstall();
        return;
    }
    if kind == ThreadKind::Render && dispatcher.config.heartbeat_enabled {
        dispatcher.set_heartbeat(Some(Arc::new(HeartbeatTimer::new(pump))));
    }
    startup.ready();
    info!(thread = %kind, "Thread ready");

    let mut pump_loop = PumpLoop::new(&dispatcher, kind, engine);
    let exit = pump_loop.run();
    let engine = pump_loop.into_engine();

    let leftover = dispatcher.queues.unregister(kind);
    if !leftover.is_empty() {
        debug!(thread = %kind, count = leftover.len(), "Running calls queued during exit");
    }
    for envelope in leftover {
        envelope.run();
    }

    if kind == ThreadKind::Render {
        dispatcher.set_heartbeat(None);
    }
    if let Some(mut engine) = engine {
        engine.shutdown();
        debug!("Engine shut down");
    }

    uninstall();
    let late = take_deferred_exit();

    match exit {
        LoopExit::Quit(request) => request.acknowledge(),
        LoopExit::Closed => warn!(thread = %kind, "Native queue closed"),
        LoopExit::Failed(e) => error!(thread = %kind, "Pump loop failed: {}", e),
    }
    if let Some(LoopExit::Quit(request)) = late {
        request.acknowledge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use blinkhost_pump::{is_installed, PumpError};

    use crate::engine::{NullEngine, RenderEngine};

    #[derive(Default, Clone)]
    struct Counters {
        initialized: Arc<AtomicUsize>,
        idled: Arc<AtomicUsize>,
        shut_down: Arc<AtomicUsize>,
    }

    struct RecordingEngine(Counters);

    impl RenderEngine for RecordingEngine {
        fn initialize(&mut self) {
            self.0.initialized.fetch_add(1, Ordering::SeqCst);
        }

        fn run_idle(&mut self) {
            self.0.idled.fetch_add(1, Ordering::SeqCst);
        }

        fn shutdown(&mut self) {
            self.0.shut_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recording_factory(counters: &Counters) -> EngineFactory {
        let counters = counters.clone();
        Box::new(move || Box::new(RecordingEngine(counters)) as Box<dyn RenderEngine>)
    }

    fn on_ui_thread<F: FnOnce() + Send + 'static>(f: F) {
        thread::Builder::new()
            .name("test-ui".to_string())
            .spawn(f)
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn test_engine_lifecycle_brackets_dispatcher() {
        on_ui_thread(|| {
            let counters = Counters::default();
            let dispatcher =
                Dispatcher::start(DispatcherConfig::default(), recording_factory(&counters))
                    .unwrap();

            assert_eq!(counters.initialized.load(Ordering::SeqCst), 1);
            dispatcher.call_sync(ThreadKind::Render, || ()).unwrap();
            dispatcher.call_sync(ThreadKind::Render, || ()).unwrap();
            assert!(counters.idled.load(Ordering::SeqCst) >= 1);
            assert_eq!(counters.shut_down.load(Ordering::SeqCst), 0);

            dispatcher.shutdown().unwrap();

            assert_eq!(counters.shut_down.load(Ordering::SeqCst), 1);
            assert_eq!(dispatcher.state(), LifecycleState::Exited);
            assert!(matches!(
                dispatcher.call_sync(ThreadKind::Render, || 1),
                Err(DispatchError::ThreadUnavailable(ThreadKind::Render))
            ));
            assert!(!is_installed());

            dispatcher.shutdown().unwrap();
        });
    }

    #[test]
    fn test_shutdown_runs_pending_calls() {
        on_ui_thread(|| {
            let dispatcher = Dispatcher::start(DispatcherConfig::default(), NullEngine::factory())
                .unwrap();
            let counter = Arc::new(AtomicUsize::new(0));

            let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
            dispatcher.post_async(ThreadKind::Render, move || {
                let _ = gate_rx.recv();
            });
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                dispatcher.post_async(ThreadKind::Render, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }

            let releaser = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                gate_tx.send(()).unwrap();
            });
            dispatcher.shutdown().unwrap();
            releaser.join().unwrap();

            assert_eq!(counter.load(Ordering::SeqCst), 10);
        });
    }

    #[test]
    fn test_render_can_call_ui_during_shutdown() {
        on_ui_thread(|| {
            let dispatcher = Dispatcher::start(DispatcherConfig::default(), NullEngine::factory())
                .unwrap();
            let inner = Arc::clone(&dispatcher);

            dispatcher.post_async(ThreadKind::Render, move || {
                thread::sleep(Duration::from_millis(10));
                let value = inner.call_sync(ThreadKind::Ui, || 5).unwrap();
                assert_eq!(value, 5);
            });

            dispatcher.shutdown().unwrap();
        });
    }

    #[test]
    fn test_shutdown_requires_ui_thread() {
        on_ui_thread(|| {
            let dispatcher = Dispatcher::start(DispatcherConfig::default(), NullEngine::factory())
                .unwrap();

            let remote = Arc::clone(&dispatcher);
            let result = thread::spawn(move || remote.shutdown()).join().unwrap();
            assert!(matches!(
                result,
                Err(DispatchError::WrongThread {
                    expected: ThreadKind::Ui
                })
            ));

            dispatcher.shutdown().unwrap();
        });
    }

    #[test]
    fn test_second_start_on_same_thread_fails() {
        on_ui_thread(|| {
            let dispatcher = Dispatcher::start(DispatcherConfig::default(), NullEngine::factory())
                .unwrap();

            let second = Dispatcher::start(DispatcherConfig::default(), NullEngine::factory());
            assert!(matches!(
                second,
                Err(DispatchError::Pump(PumpError::AlreadyInstalled))
            ));

            dispatcher.shutdown().unwrap();

            let restarted = Dispatcher::start(DispatcherConfig::default(), NullEngine::factory())
                .unwrap();
            restarted.shutdown().unwrap();
        });
    }

    #[test]
    fn test_failed_engine_startup_cleans_up() {
        on_ui_thread(|| {
            let factory: EngineFactory =
                Box::new(|| -> Box<dyn RenderEngine> { panic!("engine refused to start") });
            let result = Dispatcher::start(DispatcherConfig::default(), factory);

            assert!(matches!(
                result,
                Err(DispatchError::StartupFailed {
                    thread: ThreadKind::Render,
                    ..
                })
            ));
            assert!(!is_installed());
        });
    }

    #[test]
    fn test_heartbeat_not_armed_when_engine_fails() {
        on_ui_thread(|| {
            let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
            let factory: EngineFactory =
                Box::new(|| -> Box<dyn RenderEngine> { panic!("engine refused to start") });

            let result =
                dispatcher.spawn_worker(ThreadKind::Render, "test-render".to_string(), Some(factory));
            assert!(matches!(result, Err(DispatchError::StartupFailed { .. })));

            for (_, handle) in std::mem::take(&mut *dispatcher.threads.lock()) {
                assert!(handle.join().is_err());
            }
            assert!(!dispatcher.has_heartbeat());
            assert!(!dispatcher.request_heartbeat());
        });
    }

    #[test]
    fn test_media_thread_when_enabled() {
        on_ui_thread(|| {
            let config = DispatcherConfig {
                enable_media_thread: true,
                ..DispatcherConfig::default()
            };
            let dispatcher = Dispatcher::start(config, NullEngine::factory()).unwrap();

            let name = dispatcher
                .call_sync(ThreadKind::Media, || {
                    thread::current().name().map(str::to_owned)
                })
                .unwrap();
            assert_eq!(name.as_deref(), Some("blinkhost-media"));

            dispatcher.shutdown().unwrap();
            assert!(matches!(
                dispatcher.call_sync(ThreadKind::Media, || ()),
                Err(DispatchError::ThreadUnavailable(ThreadKind::Media))
            ));
        });
    }

    #[test]
    fn test_heartbeat_armed_while_running() {
        on_ui_thread(|| {
            let dispatcher = Dispatcher::start(DispatcherConfig::default(), NullEngine::factory())
                .unwrap();

            assert!(dispatcher.request_heartbeat());
            dispatcher.call_sync(ThreadKind::Render, || ()).unwrap();

            dispatcher.shutdown().unwrap();
            assert!(!dispatcher.request_heartbeat());
        });
    }

    #[test]
    fn test_heartbeat_disabled_by_config() {
        on_ui_thread(|| {
            let config = DispatcherConfig {
                heartbeat_enabled: false,
                ..DispatcherConfig::default()
            };
            let dispatcher = Dispatcher::start(config, NullEngine::factory()).unwrap();

            assert!(!dispatcher.request_heartbeat());
            dispatcher.shutdown().unwrap();
        });
    }

    #[test]
    fn test_ui_loop_stops_on_request() {
        on_ui_thread(|| {
            let dispatcher = Dispatcher::start(DispatcherConfig::default(), NullEngine::factory())
                .unwrap();
            let ran = Arc::new(AtomicBool::new(false));

            let inner = Arc::clone(&dispatcher);
            let flag = Arc::clone(&ran);
            dispatcher.post_async(ThreadKind::Render, move || {
                let stopper = Arc::clone(&inner);
                inner.post_async(ThreadKind::Ui, move || {
                    flag.store(true, Ordering::SeqCst);
                    stopper.stop_ui_loop().unwrap();
                });
            });

            dispatcher.run_ui_loop().unwrap();

            assert!(ran.load(Ordering::SeqCst));
            dispatcher.shutdown().unwrap();
        });
    }

    #[test]
    fn test_ui_loop_requires_ui_thread() {
        on_ui_thread(|| {
            let dispatcher = Dispatcher::start(DispatcherConfig::default(), NullEngine::factory())
                .unwrap();

            let remote = Arc::clone(&dispatcher);
            let result = thread::spawn(move || remote.run_ui_loop()).join().unwrap();
            assert!(matches!(result, Err(DispatchError::WrongThread { .. })));

            dispatcher.shutdown().unwrap();
        });
    }
}
