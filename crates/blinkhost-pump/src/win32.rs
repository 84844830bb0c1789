//! Win32 thread message queue backend.

use std::cell::Cell;
use std::sync::{Arc, Once, OnceLock};
use std::thread::{self, ThreadId};

use tracing::{debug, instrument, warn};
use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW, PeekMessageW,
    PostMessageW, PostThreadMessageW, RegisterClassW, RegisterWindowMessageW, TranslateMessage,
    HWND_MESSAGE, MSG, PM_NOREMOVE, PM_REMOVE, WINDOW_EX_STYLE, WINDOW_STYLE, WM_QUIT, WM_USER,
    WNDCLASSW,
};

use crate::error::PumpError;
use crate::{
    MessagePoster, MessagePump, PostedMessage, PumpEvent, PumpHandle, PumpResult, QuitRequest,
};

const HEARTBEAT_WINDOW_CLASS: PCWSTR = w!("BlinkhostHeartbeatWindow");

static WINDOW_CLASS: Once = Once::new();
static MESSAGES: OnceLock<RegisteredMessages> = OnceLock::new();

thread_local! {
    static HEARTBEAT_FIRED: Cell<bool> = const { Cell::new(false) };
}

/// Process-wide private window messages.
struct RegisteredMessages {
    wake: u32,
    quit: u32,
    heartbeat: u32,
}

fn messages() -> &'static RegisteredMessages {
    MESSAGES.get_or_init(|| unsafe {
        let registered = RegisteredMessages {
            wake: RegisterWindowMessageW(w!("blinkhost.dispatch.wake")),
            quit: RegisterWindowMessageW(w!("blinkhost.dispatch.quit")),
            heartbeat: RegisterWindowMessageW(w!("blinkhost.dispatch.heartbeat")),
        };
        if registered.wake == 0 || registered.quit == 0 || registered.heartbeat == 0 {
            warn!("RegisterWindowMessageW failed for a dispatcher message");
        }
        registered
    })
}

unsafe extern "system" fn heartbeat_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == messages().heartbeat {
        HEARTBEAT_FIRED.with(|fired| fired.set(true));
        return LRESULT(0);
    }
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

/// The calling thread's Win32 message queue plus its heartbeat window.
pub struct WindowsPump {
    thread_id: u32,
    thread: ThreadId,
    heartbeat_window: HWND,
}

impl WindowsPump {
    /// Create the pump for the calling thread.
    ///
    /// Forces creation of the thread's message queue so that posts made as
    /// soon as this returns are not lost.
    #[instrument(name = "win32_pump_create")]
    pub fn new() -> PumpResult<Self> {
        messages();

        let thread_id = unsafe { GetCurrentThreadId() };
        unsafe {
            let mut msg = MSG::default();
            let _ = PeekMessageW(&mut msg, HWND::default(), WM_USER, WM_USER, PM_NOREMOVE);
        }

        let heartbeat_window = create_heartbeat_window()?;

        debug!(thread_id, "Created Win32 message pump");
        Ok(Self {
            thread_id,
            thread: thread::current().id(),
            heartbeat_window,
        })
    }

    fn translate(&self, msg: MSG) -> PumpEvent {
        let messages = messages();

        if msg.hwnd.0.is_null() {
            if msg.message == messages.wake {
                return PumpEvent::Wake;
            }
            if msg.message == messages.quit {
                // Ownership of the box was handed over by `WindowsPoster::post`.
                let request = unsafe { Box::from_raw(msg.lParam.0 as *mut QuitRequest) };
                return PumpEvent::Quit(*request);
            }
        }

        unsafe {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }

        if HEARTBEAT_FIRED.with(|fired| fired.replace(false)) {
            PumpEvent::Heartbeat
        } else {
            PumpEvent::Dispatched
        }
    }
}

impl MessagePump for WindowsPump {
    fn handle(&self) -> PumpHandle {
        PumpHandle::new(
            Arc::new(WindowsPoster {
                thread_id: self.thread_id,
                heartbeat_window: self.heartbeat_window.0 as isize,
            }),
            self.thread,
        )
    }

    fn wait(&mut self) -> PumpResult<PumpEvent> {
        let mut msg = MSG::default();
        let ret = unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) };

        match ret.0 {
            -1 => Err(windows::core::Error::from_win32().into()),
            0 => Ok(PumpEvent::Closed),
            _ => Ok(self.translate(msg)),
        }
    }

    fn poll(&mut self) -> PumpResult<Option<PumpEvent>> {
        let mut msg = MSG::default();
        let has_message = unsafe { PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE) };

        if !has_message.as_bool() {
            return Ok(None);
        }
        if msg.message == WM_QUIT {
            return Ok(Some(PumpEvent::Closed));
        }
        Ok(Some(self.translate(msg)))
    }
}

impl Drop for WindowsPump {
    fn drop(&mut self) {
        unsafe {
            let _ = DestroyWindow(self.heartbeat_window);
        }
    }
}

fn create_heartbeat_window() -> PumpResult<HWND> {
    let instance: HINSTANCE = unsafe { GetModuleHandleW(None)? }.into();

    WINDOW_CLASS.call_once(|| {
        let class = WNDCLASSW {
            lpfnWndProc: Some(heartbeat_window_proc),
            hInstance: instance,
            lpszClassName: HEARTBEAT_WINDOW_CLASS,
            ..Default::default()
        };
        if unsafe { RegisterClassW(&class) } == 0 {
            warn!("Failed to register heartbeat window class");
        }
    });

    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            HEARTBEAT_WINDOW_CLASS,
            w!(""),
            WINDOW_STYLE::default(),
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            None,
            instance,
            None,
        )?
    };

    if hwnd.0.is_null() {
        return Err(PumpError::WindowsApi {
            message: "Failed to create heartbeat window".to_string(),
            source: None,
        });
    }

    Ok(hwnd)
}

struct WindowsPoster {
    thread_id: u32,
    heartbeat_window: isize,
}

impl MessagePoster for WindowsPoster {
    fn post(&self, message: PostedMessage) -> PumpResult<()> {
        let messages = messages();

        match message {
            PostedMessage::Wake => unsafe {
                PostThreadMessageW(self.thread_id, messages.wake, WPARAM(0), LPARAM(0))?;
            },
            PostedMessage::Heartbeat => unsafe {
                PostMessageW(
                    HWND(self.heartbeat_window as *mut _),
                    messages.heartbeat,
                    WPARAM(0),
                    LPARAM(0),
                )?;
            },
            PostedMessage::Quit(request) => {
                let raw = Box::into_raw(Box::new(request));
                let posted = unsafe {
                    PostThreadMessageW(self.thread_id, messages.quit, WPARAM(0), LPARAM(raw as isize))
                };
                if let Err(e) = posted {
                    // Never delivered, so the box is still ours.
                    drop(unsafe { Box::from_raw(raw) });
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }
}
