//! Process-wide dispatcher.
//!
//! Collaborators that cannot carry a `Dispatcher` reference (download
//! manager, printing, the C API) go through these functions. Using any of
//! them before [`init_dispatcher`] panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info};

use blinkhost_proto::{DispatcherConfig, ThreadKind};

use crate::dispatcher::Dispatcher;
use crate::engine::EngineFactory;
use crate::error::DispatchError;
use crate::live::{LiveHandle, LiveObjects};
use crate::DispatchResult;

static DISPATCHER: RwLock<Option<Arc<Dispatcher>>> = RwLock::new(None);
static INITIALIZING: AtomicBool = AtomicBool::new(false);

/// Start the process-wide dispatcher on the calling (UI) thread.
pub fn init_dispatcher(
    config: DispatcherConfig,
    engine: EngineFactory,
) -> DispatchResult<Arc<Dispatcher>> {
    if DISPATCHER.read().is_some()
        || INITIALIZING
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
    {
        return Err(DispatchError::AlreadyStarted);
    }

    let result = Dispatcher::start(config, engine);
    if let Ok(dispatcher) = &result {
        *DISPATCHER.write() = Some(Arc::clone(dispatcher));
        info!("Process dispatcher installed");
    }
    INITIALIZING.store(false, Ordering::Release);
    result
}

/// Stop the process-wide dispatcher. Must run on the UI thread.
pub fn shutdown_dispatcher() -> DispatchResult<()> {
    let dispatcher = DISPATCHER.read().clone().ok_or(DispatchError::NotStarted)?;
    dispatcher.shutdown()?;
    *DISPATCHER.write() = None;
    debug!("Process dispatcher cleared");
    Ok(())
}

/// The process-wide dispatcher, if initialized.
pub fn try_dispatcher() -> Option<Arc<Dispatcher>> {
    DISPATCHER.read().clone()
}

/// The process-wide dispatcher.
///
/// # Panics
///
/// Panics if [`init_dispatcher`] has not been called.
#[track_caller]
pub fn dispatcher() -> Arc<Dispatcher> {
    match try_dispatcher() {
        Some(dispatcher) => dispatcher,
        None => {
            error!("Dispatcher used before init_dispatcher");
            panic!("dispatcher used before init_dispatcher");
        }
    }
}

#[track_caller]
pub fn post_async<F>(kind: ThreadKind, f: F)
where
    F: FnOnce() + Send + 'static,
{
    dispatcher().post_async(kind, f);
}

#[track_caller]
pub fn call_sync<R, F>(kind: ThreadKind, f: F) -> DispatchResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    dispatcher().call_sync(kind, f)
}

#[track_caller]
pub fn post_to_live_object<T, F>(objects: &Arc<LiveObjects<T>>, handle: LiveHandle, f: F)
where
    T: Send + Sync + 'static,
    F: FnOnce(&T) + Send + 'static,
{
    dispatcher().post_to_live_object(objects, handle, f);
}

#[track_caller]
pub fn post_aux<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    dispatcher().post_aux(f);
}

#[track_caller]
pub fn call_aux<R, F>(f: F) -> DispatchResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    dispatcher().call_aux(f)
}

#[track_caller]
pub fn register_idle_hook<F>(kind: ThreadKind, hook: F)
where
    F: FnMut() + Send + 'static,
{
    dispatcher().register_idle_hook(kind, hook);
}

#[track_caller]
pub fn register_init_hook<F>(hook: F)
where
    F: FnOnce() + Send + 'static,
{
    dispatcher().register_init_hook(hook);
}

#[track_caller]
pub fn is_current_thread(kind: ThreadKind) -> bool {
    dispatcher().is_current_thread(kind)
}

#[track_caller]
pub fn wake(kind: ThreadKind) -> DispatchResult<()> {
    dispatcher().wake(kind)
}

#[track_caller]
pub fn run_queued() -> usize {
    dispatcher().run_queued()
}

/// Heartbeat entry point handed to the engine as a plain function pointer.
///
/// Safe to call from any thread, before init and after shutdown.
pub extern "C" fn request_render_heartbeat() {
    if let Some(dispatcher) = try_dispatcher() {
        dispatcher.request_heartbeat();
    }
}
