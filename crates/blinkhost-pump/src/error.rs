//! Error types for the pump module.

use thiserror::Error;

/// Errors that can occur while posting to or pumping a native message queue.
#[derive(Debug, Error)]
pub enum PumpError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// The receiving thread's queue no longer exists.
    #[error("Message queue disconnected")]
    Disconnected,

    /// A pump is already installed on this thread.
    #[error("A message pump is already installed on this thread")]
    AlreadyInstalled,

    /// No pump is installed on this thread.
    #[error("No message pump installed on this thread")]
    NotInstalled,

    /// The thread's pump is borrowed by an outer pumping frame.
    #[error("Message pump is busy in an outer frame")]
    Busy,
}

#[cfg(windows)]
impl From<windows::core::Error> for PumpError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}
