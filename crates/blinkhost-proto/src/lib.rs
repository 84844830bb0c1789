//! Thread identity, state machine and configuration contracts for blinkhost.
//!
//! This crate defines the plain data shared by the native pump backends and
//! the cross-thread dispatcher. Nothing in here spawns threads or locks.

mod config;
mod state;
mod thread;
mod trace;

pub use config::DispatcherConfig;
pub use state::{LifecycleState, PumpPhase};
pub use thread::ThreadKind;
pub use trace::TraceLocation;

/// Number of logical threads known to the dispatcher.
pub const THREAD_KIND_COUNT: usize = 3;
