//! Windows low-level hook installation and the hook thread.
//!
//! Both hooks are installed from a dedicated thread that then runs a Win32
//! message pump; low-level hook callbacks are delivered on that thread. The
//! OS penalizes slow hook callbacks, so they only classify the event, apply
//! the move throttle and push the sample into the capture channel.

use super::{CaptureConfig, MoveThrottle};
use crate::error::{ReenactError, Result};
use crate::events::{CapturedEvent, KeySample, MouseEventKind, MouseSample, Position};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, warn};
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PostThreadMessageW, SetWindowsHookExW,
    TranslateMessage, UnhookWindowsHookEx, KBDLLHOOKSTRUCT, MSG, MSLLHOOKSTRUCT, WH_KEYBOARD_LL,
    WH_MOUSE_LL, WM_KEYDOWN, WM_KEYUP, WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP,
};

struct HookSession {
    sample_tx: Mutex<Sender<CapturedEvent>>,
    throttle: Mutex<MoveThrottle>,
    config: CaptureConfig,
}

/// Hook procedures are plain functions with no context argument, so they
/// reach the active session through this process-wide slot. The slot is
/// populated after both hooks install and cleared before they are removed,
/// so a callback that fires outside a session sees `None` and passes the
/// event straight through.
static ACTIVE_SESSION: LazyLock<RwLock<Option<Arc<HookSession>>>> =
    LazyLock::new(|| RwLock::new(None));

fn current_session() -> Option<Arc<HookSession>> {
    match ACTIVE_SESSION.read() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    }
}

/// Spawn the hook thread and block until it reports whether both hooks
/// installed. On failure the thread has already rolled back any
/// partially-installed hook and exited.
pub(crate) fn install_hooks(
    config: CaptureConfig,
    sample_tx: Sender<CapturedEvent>,
) -> Result<(JoinHandle<()>, u32)> {
    let session = Arc::new(HookSession {
        sample_tx: Mutex::new(sample_tx),
        throttle: Mutex::new(MoveThrottle::default()),
        config,
    });

    let (ready_tx, ready_rx) = mpsc::channel();
    let handle = thread::spawn(move || hook_thread_main(session, ready_tx));

    match ready_rx.recv() {
        Ok(Ok(thread_id)) => Ok((handle, thread_id)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(ReenactError::HookInstall(
                "hook thread exited before reporting readiness".to_string(),
            ))
        }
    }
}

/// Ask the hook thread to leave its message pump
pub(crate) fn request_hook_shutdown(thread_id: u32) {
    let posted = unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) };
    if let Err(e) = posted {
        warn!("failed to post WM_QUIT to hook thread {thread_id}: {e}");
    }
}

fn hook_thread_main(session: Arc<HookSession>, ready_tx: Sender<Result<u32>>) {
    let mouse_hook = match unsafe { SetWindowsHookExW(WH_MOUSE_LL, Some(low_level_mouse_proc), None, 0) }
    {
        Ok(hook) => hook,
        Err(e) => {
            let _ = ready_tx.send(Err(ReenactError::HookInstall(format!("WH_MOUSE_LL: {e}"))));
            return;
        }
    };

    let keyboard_hook =
        match unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(low_level_keyboard_proc), None, 0) } {
            Ok(hook) => hook,
            Err(e) => {
                // Roll back the partial install before reporting failure.
                if let Err(unhook_err) = unsafe { UnhookWindowsHookEx(mouse_hook) } {
                    warn!("failed to remove mouse hook during rollback: {unhook_err}");
                }
                let _ = ready_tx.send(Err(ReenactError::HookInstall(format!(
                    "WH_KEYBOARD_LL: {e}"
                ))));
                return;
            }
        };

    *ACTIVE_SESSION.write().unwrap() = Some(session);

    let thread_id = unsafe { GetCurrentThreadId() };
    let _ = ready_tx.send(Ok(thread_id));
    debug!("input hooks installed (hook thread {thread_id})");

    run_message_pump();

    // Clearing the slot drops the sample sender, which lets the dispatch
    // worker drain out and observe the closed channel.
    *ACTIVE_SESSION.write().unwrap() = None;

    unsafe {
        if let Err(e) = UnhookWindowsHookEx(keyboard_hook) {
            warn!("failed to remove keyboard hook: {e}");
        }
        if let Err(e) = UnhookWindowsHookEx(mouse_hook) {
            warn!("failed to remove mouse hook: {e}");
        }
    }
    debug!("hook thread exited");
}

fn run_message_pump() {
    let mut msg = MSG::default();
    loop {
        let result = unsafe { GetMessageW(&mut msg, None, 0, 0) };
        match result.0 {
            -1 => {
                error!("hook thread message pump failed");
                break;
            }
            0 => {
                debug!("WM_QUIT received by hook thread");
                break;
            }
            _ => unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            },
        }
    }
}

unsafe extern "system" fn low_level_mouse_proc(
    code: i32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if code >= 0 && lparam.0 != 0 {
        if let Some(session) = current_session() {
            if session.config.capture_mouse {
                let info = &*(lparam.0 as *const MSLLHOOKSTRUCT);
                // Message codes outside the recorded set (XBUTTON etc.) pass
                // through unrecorded.
                if let Ok(kind) = MouseEventKind::try_from(wparam.0 as u32) {
                    let position = Position {
                        x: info.pt.x,
                        y: info.pt.y,
                    };
                    let now = Instant::now();

                    let accepted = if kind.is_move() {
                        match session.throttle.lock() {
                            Ok(mut throttle) => throttle.accept(
                                position,
                                now,
                                session.config.mouse_move_min_distance,
                                session.config.mouse_move_min_interval,
                            ),
                            Err(_) => false,
                        }
                    } else {
                        true
                    };

                    if accepted {
                        let sample = CapturedEvent::Mouse(MouseSample {
                            position,
                            kind,
                            captured_at: now,
                        });
                        if let Ok(tx) = session.sample_tx.lock() {
                            let _ = tx.send(sample);
                        }
                    }
                }
            }
        }
    }
    CallNextHookEx(None, code, wparam, lparam)
}

unsafe extern "system" fn low_level_keyboard_proc(
    code: i32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if code >= 0 && lparam.0 != 0 {
        if let Some(session) = current_session() {
            if session.config.capture_keyboard {
                let info = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
                let message = wparam.0 as u32;
                let key_down = matches!(message, WM_KEYDOWN | WM_SYSKEYDOWN);
                let key_up = matches!(message, WM_KEYUP | WM_SYSKEYUP);
                if key_down || key_up {
                    let sample = CapturedEvent::Key(KeySample {
                        vk_code: info.vkCode,
                        key_down,
                        captured_at: Instant::now(),
                    });
                    if let Ok(tx) = session.sample_tx.lock() {
                        let _ = tx.send(sample);
                    }
                }
            }
        }
    }
    CallNextHookEx(None, code, wparam, lparam)
}
