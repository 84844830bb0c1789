//! Blinkhost host application library.
//!
//! Starts the dispatcher with the calling thread as the UI thread, drives a
//! short session of cross-thread traffic against a logging engine and shuts
//! everything down again.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use blinkhost_dispatch::{
    call_sync, init_dispatcher, post_async, post_to_live_object, register_idle_hook,
    register_init_hook, request_render_heartbeat, shutdown_dispatcher, LiveObjects, RenderEngine,
    ThreadKind,
};
use blinkhost_proto::DispatcherConfig;

/// Initialize logging. Call once, from `main`.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_thread_names(true)
        .init();
}

/// Parse a dispatcher configuration. Missing fields take their defaults.
pub fn parse_config(text: &str) -> Result<DispatcherConfig> {
    serde_json::from_str(text).context("Invalid dispatcher configuration")
}

/// Load the dispatcher configuration from `path`, or use the defaults.
pub fn load_config(path: Option<&Path>) -> Result<DispatcherConfig> {
    let Some(path) = path else {
        return Ok(DispatcherConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&text)
}

/// Engine stand-in that logs its callbacks.
struct LoggingEngine {
    idle_passes: Arc<AtomicU64>,
}

impl RenderEngine for LoggingEngine {
    fn initialize(&mut self) {
        info!("Engine initialized");
    }

    fn run_idle(&mut self) {
        self.idle_passes.fetch_add(1, Ordering::Relaxed);
    }

    fn shutdown(&mut self) {
        info!(
            idle_passes = self.idle_passes.load(Ordering::Relaxed),
            "Engine shut down"
        );
    }
}

/// A page kept in the live-object table.
struct View {
    url: String,
    loads: AtomicU64,
}

impl View {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            loads: AtomicU64::new(0),
        }
    }

    fn load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!(url = %self.url, "View loaded");
    }
}

/// What a session observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Result of the sync round trip to the render thread.
    pub sum: i32,

    /// Async calls that ran on the render thread.
    pub async_calls: usize,

    /// Loads delivered to the view that stayed open.
    pub view_loads: u64,

    /// Whether the render-side idle hook ran.
    pub render_idle_ran: bool,
}

/// Run one session on the calling thread, which becomes the UI thread.
pub fn run(config: DispatcherConfig) -> Result<SessionReport> {
    let idle_passes = Arc::new(AtomicU64::new(0));
    let engine_idle = Arc::clone(&idle_passes);
    let dispatcher = init_dispatcher(
        config,
        Box::new(move || {
            Box::new(LoggingEngine {
                idle_passes: engine_idle,
            }) as Box<dyn RenderEngine>
        }),
    )
    .context("Failed to start dispatcher")?;

    register_init_hook(|| info!("Render loop initialized"));
    let idle_hits = Arc::new(AtomicUsize::new(0));
    let idle_counter = Arc::clone(&idle_hits);
    register_idle_hook(ThreadKind::Render, move || {
        idle_counter.fetch_add(1, Ordering::Relaxed);
    });

    let sum = call_sync(ThreadKind::Render, || 2 + 2).context("Sync call to render failed")?;
    info!(sum, "Sync call returned");

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let counter = Arc::clone(&counter);
        post_async(ThreadKind::Render, move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }

    let views = Arc::new(LiveObjects::new());
    let open = views.insert(View::new("about:blank"));
    let closing = views.insert(View::new("about:closing"));
    post_to_live_object(&views, open, View::load);
    post_to_live_object(&views, closing, View::load);
    views.remove(closing);

    request_render_heartbeat();

    // Render hands control back once everything above has run.
    let stopper = Arc::clone(&dispatcher);
    post_async(ThreadKind::Render, move || {
        let ui = Arc::clone(&stopper);
        stopper.post_async(ThreadKind::Ui, move || {
            if let Err(e) = ui.stop_ui_loop() {
                warn!("Failed to stop UI loop: {}", e);
            }
        });
    });
    dispatcher.run_ui_loop().context("UI loop failed")?;

    let report = SessionReport {
        sum,
        async_calls: counter.load(Ordering::Relaxed),
        view_loads: views
            .resolve(open)
            .map_or(0, |view| view.loads.load(Ordering::Relaxed)),
        render_idle_ran: idle_hits.load(Ordering::Relaxed) > 0,
    };

    shutdown_dispatcher().context("Failed to shut down dispatcher")?;
    info!(
        idle_passes = idle_passes.load(Ordering::Relaxed),
        "Session finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_parse_partial_config() {
        let config = parse_config(r#"{ "enable_media_thread": true, "sync_poll_interval_ms": 3 }"#)
            .unwrap();

        assert!(config.enable_media_thread);
        assert_eq!(config.sync_poll_interval_ms, 3);
        assert_eq!(config.render_thread_name, "blinkhost-render");
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        assert!(parse_config("{ not json").is_err());
        assert!(parse_config(r#"{ "heartbeat_enabled": "yes" }"#).is_err());
    }

    #[test]
    fn test_load_config_defaults_without_path() {
        assert_eq!(load_config(None).unwrap(), DispatcherConfig::default());
        assert!(load_config(Some(Path::new("/nonexistent/blinkhost.json"))).is_err());
    }

    #[test]
    fn test_session_round_trip() {
        let report = thread::spawn(|| run(DispatcherConfig::default()))
            .join()
            .unwrap()
            .unwrap();

        assert_eq!(report.sum, 4);
        assert_eq!(report.async_calls, 100);
        assert_eq!(report.view_loads, 1);
        assert!(report.render_idle_ran);
    }
}
