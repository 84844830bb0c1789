//! Error types for the dispatcher.

use std::thread::ThreadId;

use thiserror::Error;

use blinkhost_proto::{ThreadKind, TraceLocation};
use blinkhost_pump::PumpError;

/// Errors that can occur while dispatching or managing threads.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Native message pump error.
    #[error("Message pump error: {0}")]
    Pump(#[from] PumpError),

    /// The target thread was never started or has already exited.
    #[error("Target thread not running: {0}")]
    ThreadUnavailable(ThreadKind),

    /// The dispatcher was already started.
    #[error("Dispatcher already started")]
    AlreadyStarted,

    /// The dispatcher was not started.
    #[error("Dispatcher not started")]
    NotStarted,

    /// A dispatcher thread failed during startup.
    #[error("{thread} thread failed to start: {message}")]
    StartupFailed { thread: ThreadKind, message: String },

    /// The OS refused to spawn a thread.
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The operation must run on a specific thread.
    #[error("Must be called on the {expected} thread")]
    WrongThread { expected: ThreadKind },

    /// A sync call's result slot did not hold the expected type.
    #[error("Call result had an unexpected type")]
    ResultMismatch,
}

/// An envelope was about to be destroyed on a thread that does not own it.
#[derive(Debug, Error)]
#[error("envelope from {trace} destroyed on {actual:?}, expected {expected:?}")]
pub struct InvariantViolation {
    /// Where the call was issued.
    pub trace: TraceLocation,

    /// Thread that owns the destroy step.
    pub expected: ThreadId,

    /// Thread that attempted it.
    pub actual: ThreadId,
}
