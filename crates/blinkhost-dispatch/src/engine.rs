//! The surface through which the render loop drives the embedded engine.

/// Callbacks into the embedded rendering engine.
///
/// The engine is created on the render thread by an [`EngineFactory`] and
/// never leaves it, so implementations need not be `Send`.
pub trait RenderEngine {
    /// Called once on the render thread before it reports ready.
    fn initialize(&mut self) {}

    /// Run the engine's own scheduled tasks. Called before each drain.
    fn run_pending_tasks(&mut self) {}

    /// Let the engine do idle work (timers, layout, paint).
    fn run_idle(&mut self) {}

    /// Called once after the render loop exits.
    fn shutdown(&mut self) {}
}

/// Builds the engine on the render thread.
pub type EngineFactory = Box<dyn FnOnce() -> Box<dyn RenderEngine> + Send>;

/// Engine that does nothing, for hosts without an embedded engine.
#[derive(Debug, Default)]
pub struct NullEngine;

impl RenderEngine for NullEngine {}

impl NullEngine {
    /// Factory producing a [`NullEngine`].
    pub fn factory() -> EngineFactory {
        Box::new(|| Box::new(NullEngine) as Box<dyn RenderEngine>)
    }
}
