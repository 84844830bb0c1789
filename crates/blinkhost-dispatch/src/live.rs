//! Handle table for objects that may die while calls to them are queued.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Opaque numeric handle to a live object. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveHandle(NonZeroU64);

impl LiveHandle {
    /// Rebuild a handle from its raw value (0 is never a valid handle).
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Raw value suitable for crossing an FFI boundary.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for LiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Maps handles to live objects, typically the engine's web views.
pub struct LiveObjects<T> {
    next: AtomicU64,
    objects: Mutex<HashMap<LiveHandle, Arc<T>>>,
}

impl<T> LiveObjects<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Register an object and return its handle.
    pub fn insert(&self, object: T) -> LiveHandle {
        self.insert_arc(Arc::new(object))
    }

    /// Register an already shared object and return its handle.
    pub fn insert_arc(&self, object: Arc<T>) -> LiveHandle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        let handle = LiveHandle::from_raw(raw).unwrap_or(LiveHandle(NonZeroU64::MIN));
        self.objects.lock().insert(handle, object);
        handle
    }

    /// Unregister an object. Calls still queued for it will be skipped.
    pub fn remove(&self, handle: LiveHandle) -> Option<Arc<T>> {
        self.objects.lock().remove(&handle)
    }

    /// Look up a live object.
    pub fn resolve(&self, handle: LiveHandle) -> Option<Arc<T>> {
        self.objects.lock().get(&handle).cloned()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns true if no objects are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for LiveObjects<T> {
    fn default() -> Self {
        Self::new()
    }
}
