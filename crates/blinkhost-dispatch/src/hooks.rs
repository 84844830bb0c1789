//! Single-slot init and idle hooks run by the pump loops.

use parking_lot::Mutex;

use blinkhost_proto::{ThreadKind, THREAD_KIND_COUNT};

/// Callback run once per pump loop iteration.
pub type IdleHook = Box<dyn FnMut() + Send>;

/// Callback run once, on the first render loop iteration after registration.
pub type InitHook = Box<dyn FnOnce() + Send>;

/// Hook slots. Registration is last-writer-wins.
pub(crate) struct HookTable {
    init: Mutex<Option<InitHook>>,
    idle: Mutex<[Option<IdleHook>; THREAD_KIND_COUNT]>,
}

impl HookTable {
    pub fn new() -> Self {
        Self {
            init: Mutex::new(None),
            idle: Mutex::new([None, None, None]),
        }
    }

    pub fn set_init(&self, hook: InitHook) {
        *self.init.lock() = Some(hook);
    }

    pub fn set_idle(&self, kind: ThreadKind, hook: IdleHook) {
        self.idle.lock()[kind.index()] = Some(hook);
    }

    /// Run and clear the init hook. Returns whether one ran.
    pub fn run_init(&self) -> bool {
        let hook = self.init.lock().take();
        match hook {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }

    /// Run the idle hook for `kind`, if any.
    ///
    /// The hook runs outside the lock so it may register hooks itself; a
    /// hook registered while it runs replaces it.
    pub fn run_idle(&self, kind: ThreadKind) -> bool {
        let hook = self.idle.lock()[kind.index()].take();
        let Some(mut hook) = hook else {
            return false;
        };

        hook();

        let mut idle = self.idle.lock();
        let slot = &mut idle[kind.index()];
        if slot.is_none() {
            *slot = Some(hook);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_init_hook_fires_once() {
        let hooks = HookTable::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        hooks.set_init(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(hooks.run_init());
        assert!(!hooks.run_init());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_hook_is_per_thread_and_persistent() {
        let hooks = HookTable::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        hooks.set_idle(
            ThreadKind::Ui,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(hooks.run_idle(ThreadKind::Ui));
        assert!(hooks.run_idle(ThreadKind::Ui));
        assert!(!hooks.run_idle(ThreadKind::Render));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_last_writer_wins() {
        let hooks = Arc::new(HookTable::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let replacer = Arc::clone(&hooks);
        let first_counter = Arc::clone(&first);
        let second_counter = Arc::clone(&second);
        hooks.set_idle(
            ThreadKind::Render,
            Box::new(move || {
                first_counter.fetch_add(1, Ordering::SeqCst);
                let second_counter = Arc::clone(&second_counter);
                replacer.set_idle(
                    ThreadKind::Render,
                    Box::new(move || {
                        second_counter.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        hooks.run_idle(ThreadKind::Render);
        hooks.run_idle(ThreadKind::Render);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
