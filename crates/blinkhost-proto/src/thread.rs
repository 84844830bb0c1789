//! Logical thread identities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::THREAD_KIND_COUNT;

/// The fixed set of named threads a closure can be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadKind {
    /// The host application's UI thread.
    Ui,

    /// The thread that owns the embedded rendering engine.
    Render,

    /// Auxiliary media thread (disabled unless configured).
    Media,
}

impl ThreadKind {
    /// All thread kinds, in slot order.
    pub const ALL: [ThreadKind; THREAD_KIND_COUNT] =
        [ThreadKind::Ui, ThreadKind::Render, ThreadKind::Media];

    /// Slot index used by per-thread tables.
    pub fn index(self) -> usize {
        match self {
            Self::Ui => 0,
            Self::Render => 1,
            Self::Media => 2,
        }
    }

    /// Returns the display name for this thread.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Render => "render",
            Self::Media => "media",
        }
    }
}

impl fmt::Display for ThreadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
