//! Windows input injection for the replay worker.
//!
//! Mirrors what the capture side records: the cursor is repositioned to the
//! recorded coordinates first, then the button or key transition is
//! synthesized through `SendInput`. The replay worker is the only caller,
//! so injections are naturally serialized.

use super::InputInjector;
use crate::error::{ReenactError, Result};
use crate::events::{MouseEventKind, RecordedEvent};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_KEYUP, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN,
    MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEINPUT, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::SetCursorPos;

/// Injects recorded events through `SendInput`
pub struct SendInputInjector;

impl InputInjector for SendInputInjector {
    fn inject(&mut self, event: &RecordedEvent) -> Result<()> {
        match *event {
            RecordedEvent::Mouse { x, y, kind, .. } => inject_mouse(x, y, kind),
            RecordedEvent::Keyboard {
                vk_code, key_down, ..
            } => inject_key(vk_code, key_down),
        }
    }
}

fn inject_mouse(x: i32, y: i32, kind: MouseEventKind) -> Result<()> {
    unsafe { SetCursorPos(x, y) }
        .map_err(|e| ReenactError::Injection(format!("SetCursorPos({x},{y}): {e}")))?;

    let flags = match kind {
        MouseEventKind::LeftDown => MOUSEEVENTF_LEFTDOWN,
        MouseEventKind::LeftUp => MOUSEEVENTF_LEFTUP,
        MouseEventKind::RightDown => MOUSEEVENTF_RIGHTDOWN,
        MouseEventKind::RightUp => MOUSEEVENTF_RIGHTUP,
        MouseEventKind::MiddleDown => MOUSEEVENTF_MIDDLEDOWN,
        MouseEventKind::MiddleUp => MOUSEEVENTF_MIDDLEUP,
        // Repositioning the cursor is the whole effect for a move; wheel
        // deltas are not persisted in the recording format, so a wheel
        // event repositions only.
        MouseEventKind::Move | MouseEventKind::Wheel => return Ok(()),
    };

    let input = INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: 0,
                dy: 0,
                mouseData: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };

    let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
    if sent == 0 {
        return Err(ReenactError::Injection(format!(
            "SendInput rejected mouse event {kind:?} at ({x},{y})"
        )));
    }
    Ok(())
}

fn inject_key(vk_code: u32, key_down: bool) -> Result<()> {
    let input = INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY((vk_code & 0xFFFF) as u16),
                wScan: 0,
                dwFlags: if key_down {
                    KEYBD_EVENT_FLAGS(0)
                } else {
                    KEYEVENTF_KEYUP
                },
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };

    let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
    if sent == 0 {
        return Err(ReenactError::Injection(format!(
            "SendInput rejected key event vk={vk_code} down={key_down}"
        )));
    }
    Ok(())
}
