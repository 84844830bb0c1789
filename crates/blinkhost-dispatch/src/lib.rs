//! Cross-thread task dispatcher for the embedded render engine.
//!
//! The dispatcher owns one FIFO queue per logical thread (UI, render,
//! media). Closures are wrapped in envelopes, pushed onto the target queue
//! and the target is woken through its native message pump. Each thread's
//! pump loop drains its queue, lets the engine run idle work and then
//! blocks on the next native message.

mod dispatcher;
mod engine;
mod envelope;
mod error;
mod global;
mod heartbeat;
mod hooks;
mod lifecycle;
mod live;
mod pump_loop;
mod queue;

pub use dispatcher::Dispatcher;
pub use engine::{EngineFactory, NullEngine, RenderEngine};
pub use error::{DispatchError, InvariantViolation};
pub use global::{
    call_aux, call_sync, dispatcher, init_dispatcher, is_current_thread, post_async, post_aux,
    post_to_live_object, register_idle_hook, register_init_hook, request_render_heartbeat,
    run_queued, shutdown_dispatcher, try_dispatcher, wake,
};
pub use heartbeat::HeartbeatTimer;
pub use hooks::{IdleHook, InitHook};
pub use live::{LiveHandle, LiveObjects};

pub use blinkhost_proto::{DispatcherConfig, LifecycleState, ThreadKind, TraceLocation};

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
