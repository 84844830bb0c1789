//! Native message pump backends for blinkhost.
//!
//! Every dispatcher thread owns exactly one native message queue. This crate
//! hides how that queue is implemented: on Windows it is the thread's Win32
//! message queue plus a hidden message-only window for heartbeats; elsewhere
//! (and in tests) it is a channel with the same contract.

mod channel;
mod current;
mod error;
#[cfg(windows)]
mod win32;

pub use channel::ChannelPump;
pub use current::{install, is_installed, poll_current, uninstall, wait_current};
pub use error::PumpError;
#[cfg(windows)]
pub use win32::WindowsPump;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Result type for pump operations.
pub type PumpResult<T> = Result<T, PumpError>;

/// Payload of a quit message: who asked, and the flag to raise once the
/// receiving thread has finished tearing down.
#[derive(Debug)]
pub struct QuitRequest {
    /// Thread that requested the exit.
    pub requester: ThreadId,

    /// Shared completion flag the requester polls.
    pub exit_flag: Arc<AtomicBool>,
}

impl QuitRequest {
    /// Create a quit request from the calling thread.
    pub fn new(exit_flag: Arc<AtomicBool>) -> Self {
        Self {
            requester: thread::current().id(),
            exit_flag,
        }
    }

    /// Signal the requester that the exit has completed.
    pub fn acknowledge(self) {
        self.exit_flag.store(true, Ordering::Release);
    }
}

/// Messages that can be posted to a pump from any thread.
#[derive(Debug)]
pub enum PostedMessage {
    /// Queued work is waiting for the receiving thread.
    Wake,

    /// The engine asked for an out-of-band pump cycle.
    Heartbeat,

    /// The receiving thread should leave its loop.
    Quit(QuitRequest),
}

/// What one pump step produced.
#[derive(Debug)]
pub enum PumpEvent {
    /// A wake message arrived.
    Wake,

    /// The heartbeat window received its private message.
    Heartbeat,

    /// A quit message arrived.
    Quit(QuitRequest),

    /// A foreign message was translated and dispatched to its window.
    Dispatched,

    /// The OS-level queue was closed (`WM_QUIT`).
    Closed,
}

impl From<PostedMessage> for PumpEvent {
    fn from(message: PostedMessage) -> Self {
        match message {
            PostedMessage::Wake => Self::Wake,
            PostedMessage::Heartbeat => Self::Heartbeat,
            PostedMessage::Quit(request) => Self::Quit(request),
        }
    }
}

/// Sending half of a native message queue. Callable from any thread.
pub trait MessagePoster: Send + Sync {
    /// Post a message without waiting for it to be processed.
    fn post(&self, message: PostedMessage) -> PumpResult<()>;
}

/// Cloneable handle used by other threads to signal a pump.
#[derive(Clone)]
pub struct PumpHandle {
    poster: Arc<dyn MessagePoster>,
    thread: ThreadId,
}

impl PumpHandle {
    /// Create a handle for the pump owned by `thread`.
    pub fn new(poster: Arc<dyn MessagePoster>, thread: ThreadId) -> Self {
        Self { poster, thread }
    }

    /// Thread that owns the pump.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Post a wake message.
    pub fn wake(&self) -> PumpResult<()> {
        self.poster.post(PostedMessage::Wake)
    }

    /// Post a heartbeat message.
    pub fn heartbeat(&self) -> PumpResult<()> {
        self.poster.post(PostedMessage::Heartbeat)
    }

    /// Post a quit message.
    pub fn quit(&self, request: QuitRequest) -> PumpResult<()> {
        self.poster.post(PostedMessage::Quit(request))
    }
}

impl fmt::Debug for PumpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PumpHandle")
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

/// Receiving half of a native message queue, owned by one thread.
pub trait MessagePump {
    /// Handle other threads use to post to this pump.
    fn handle(&self) -> PumpHandle;

    /// Block until one message has been received and processed.
    fn wait(&mut self) -> PumpResult<PumpEvent>;

    /// Process one message if one is pending.
    fn poll(&mut self) -> PumpResult<Option<PumpEvent>>;
}

/// Create the platform pump for the calling thread.
#[cfg(windows)]
pub fn create_os_pump() -> PumpResult<Box<dyn MessagePump>> {
    Ok(Box::new(WindowsPump::new()?))
}

/// Create the platform pump for the calling thread.
#[cfg(not(windows))]
pub fn create_os_pump() -> PumpResult<Box<dyn MessagePump>> {
    Ok(Box::new(ChannelPump::new()))
}
