//! Dispatcher state machine types.

use serde::{Deserialize, Serialize};

/// Lifecycle of the dispatcher and its render thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// `start` has not been called.
    #[default]
    NotStarted,

    /// The render thread has been spawned and is initializing the engine.
    Starting,

    /// The render thread signalled that initialization finished.
    Ready,

    /// Both pumps are serving calls.
    Running,

    /// Shutdown was requested; the render thread is finishing in-flight work.
    ExitRequested,

    /// The render thread acknowledged exit.
    Exited,
}

impl LifecycleState {
    /// Returns the next state, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Starting),
            Self::Starting => Some(Self::Ready),
            Self::Ready => Some(Self::Running),
            Self::Running => Some(Self::ExitRequested),
            Self::ExitRequested => Some(Self::Exited),
            Self::Exited => None,
        }
    }

    /// Returns true if calls can currently be served.
    pub fn is_serving(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// Returns true once shutdown has begun.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::ExitRequested | Self::Exited)
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::Starting => "Starting",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::ExitRequested => "ExitRequested",
            Self::Exited => "Exited",
        }
    }
}

/// Phase of one pump loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpPhase {
    /// Running hooks and the engine task-runner step.
    #[default]
    Running,

    /// Executing queued envelopes.
    Draining,

    /// Letting the engine run its internal idle work.
    EngineIdle,

    /// Blocked on the native message queue.
    NativeMessageWait,

    /// The loop has returned.
    Exited,
}

impl PumpPhase {
    /// Returns the phase that follows this one within a loop iteration.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Running => Some(Self::Draining),
            Self::Draining => Some(Self::EngineIdle),
            Self::EngineIdle => Some(Self::NativeMessageWait),
            Self::NativeMessageWait => Some(Self::Running),
            Self::Exited => None,
        }
    }

    /// Returns a simple string representation of the phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Draining => "Draining",
            Self::EngineIdle => "EngineIdle",
            Self::NativeMessageWait => "NativeMessageWait",
            Self::Exited => "Exited",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_walks_to_exited() {
        let mut state = LifecycleState::default();
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            state = next;
            visited.push(state);
        }
        assert_eq!(visited.len(), 6);
        assert_eq!(state, LifecycleState::Exited);
    }

    #[test]
    fn test_lifecycle_predicates() {
        assert!(!LifecycleState::Starting.is_serving());
        assert!(LifecycleState::Running.is_serving());
        assert!(LifecycleState::ExitRequested.is_shutting_down());
        assert!(!LifecycleState::Ready.is_shutting_down());
    }

    #[test]
    fn test_pump_phase_cycles() {
        let mut phase = PumpPhase::Running;
        for _ in 0..4 {
            phase = phase.next().unwrap();
        }
        assert_eq!(phase, PumpPhase::Running);
        assert_eq!(PumpPhase::Exited.next(), None);
    }
}
