//! Call-site tags attached to every cross-thread call.

use std::fmt;
use std::panic::Location;

use serde::Serialize;

/// Where a cross-thread call was issued from. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceLocation {
    /// Enclosing function or module path, when known.
    pub function: Option<&'static str>,

    /// Source file.
    pub file: &'static str,

    /// Source line.
    pub line: u32,
}

impl TraceLocation {
    /// Create a location from explicit parts.
    pub const fn new(function: Option<&'static str>, file: &'static str, line: u32) -> Self {
        Self {
            function,
            file,
            line,
        }
    }

    /// Location of the caller of the enclosing `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }
}

impl From<&'static Location<'static>> for TraceLocation {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(None, location.file(), location.line())
    }
}

impl fmt::Display for TraceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.function {
            Some(function) => write!(f, "{} ({}:{})", function, self.file, self.line),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// Build a [`TraceLocation`] for the current module, file and line.
#[macro_export]
macro_rules! trace_location {
    () => {
        $crate::TraceLocation::new(Some(module_path!()), file!(), line!())
    };
}
