//! The calling thread's installed pump.
//!
//! A pump is installed once per thread and reached through short borrows, so
//! an outer loop and a nested sync wait on the same thread never hold it at
//! the same time.

use std::cell::RefCell;

use tracing::debug;

use crate::error::PumpError;
use crate::{MessagePump, PumpEvent, PumpHandle, PumpResult};

thread_local! {
    static CURRENT: RefCell<Option<Box<dyn MessagePump>>> = const { RefCell::new(None) };
}

/// Install `pump` as the calling thread's pump and return its handle.
pub fn install(pump: Box<dyn MessagePump>) -> PumpResult<PumpHandle> {
    CURRENT.with(|slot| {
        let mut slot = slot.try_borrow_mut().map_err(|_| PumpError::Busy)?;
        if slot.is_some() {
            return Err(PumpError::AlreadyInstalled);
        }
        let handle = pump.handle();
        *slot = Some(pump);
        debug!(thread = ?handle.thread(), "Message pump installed");
        Ok(handle)
    })
}

/// Remove and return the calling thread's pump.
pub fn uninstall() -> Option<Box<dyn MessagePump>> {
    CURRENT.with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
}

/// Whether the calling thread has a pump installed.
pub fn is_installed() -> bool {
    CURRENT.with(|slot| slot.try_borrow().map(|s| s.is_some()).unwrap_or(true))
}

/// Block on the calling thread's pump for one message.
pub fn wait_current() -> PumpResult<PumpEvent> {
    CURRENT.with(|slot| {
        let mut slot = slot.try_borrow_mut().map_err(|_| PumpError::Busy)?;
        slot.as_mut().ok_or(PumpError::NotInstalled)?.wait()
    })
}

/// Process one pending message on the calling thread's pump.
///
/// Returns `Ok(None)` when the pump is already borrowed by an outer frame
/// (for example a window procedure running inside `DispatchMessageW`).
pub fn poll_current() -> PumpResult<Option<PumpEvent>> {
    CURRENT.with(|slot| {
        let Ok(mut slot) = slot.try_borrow_mut() else {
            return Ok(None);
        };
        slot.as_mut().ok_or(PumpError::NotInstalled)?.poll()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use crate::ChannelPump;

    #[test]
    fn test_install_once_per_thread() {
        thread::spawn(|| {
            assert!(!is_installed());
            let handle = install(Box::new(ChannelPump::new())).unwrap();
            assert!(is_installed());
            assert!(matches!(
                install(Box::new(ChannelPump::new())),
                Err(PumpError::AlreadyInstalled)
            ));

            handle.wake().unwrap();
            assert!(matches!(poll_current().unwrap(), Some(PumpEvent::Wake)));
            assert!(uninstall().is_some());
            assert!(!is_installed());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_wait_without_pump() {
        thread::spawn(|| {
            assert!(matches!(wait_current(), Err(PumpError::NotInstalled)));
            assert!(!is_installed());
        })
        .join()
        .unwrap();
    }
}
