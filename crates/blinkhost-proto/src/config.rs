//! Dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for starting the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// OS-level name of the render thread.
    pub render_thread_name: String,

    /// OS-level name of the media thread.
    pub media_thread_name: String,

    /// Whether to start the media thread (default: false).
    pub enable_media_thread: bool,

    /// Spin iterations before the startup wait begins sleeping.
    pub startup_spin_budget: u32,

    /// Sleep between startup polls once the spin budget is spent.
    pub startup_poll_interval_ms: u64,

    /// How long a sync caller blocks before servicing its own queue again.
    pub sync_poll_interval_ms: u64,

    /// Sleep between shutdown acknowledgement polls.
    pub shutdown_poll_interval_ms: u64,

    /// Whether the render heartbeat is armed.
    pub heartbeat_enabled: bool,
}

impl DispatcherConfig {
    /// Startup poll interval as a duration.
    pub fn startup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.startup_poll_interval_ms)
    }

    /// Sync wait poll interval as a duration.
    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms.max(1))
    }

    /// Shutdown poll interval as a duration.
    pub fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            render_thread_name: "blinkhost-render".to_string(),
            media_thread_name: "blinkhost-media".to_string(),
            enable_media_thread: false,
            startup_spin_budget: 10_000,
            startup_poll_interval_ms: 1,
            sync_poll_interval_ms: 1,
            shutdown_poll_interval_ms: 5,
            heartbeat_enabled: true,
        }
    }
}
