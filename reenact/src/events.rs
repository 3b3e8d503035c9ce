use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

/// Represents a position on the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    /// Manhattan distance to another position, used by the mouse-move throttle
    pub fn manhattan_distance(&self, other: &Position) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

/// The kind of a low-level mouse event, carried across capture, persistence
/// and replay as the native message code (`WM_MOUSEMOVE` etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum MouseEventKind {
    Move,
    LeftDown,
    LeftUp,
    RightDown,
    RightUp,
    MiddleDown,
    MiddleUp,
    Wheel,
}

impl MouseEventKind {
    /// The native message code this kind is persisted as
    pub const fn code(self) -> u32 {
        match self {
            MouseEventKind::Move => 0x0200,
            MouseEventKind::LeftDown => 0x0201,
            MouseEventKind::LeftUp => 0x0202,
            MouseEventKind::RightDown => 0x0204,
            MouseEventKind::RightUp => 0x0205,
            MouseEventKind::MiddleDown => 0x0207,
            MouseEventKind::MiddleUp => 0x0208,
            MouseEventKind::Wheel => 0x020A,
        }
    }

    pub fn is_move(self) -> bool {
        self == MouseEventKind::Move
    }
}

impl From<MouseEventKind> for u32 {
    fn from(kind: MouseEventKind) -> u32 {
        kind.code()
    }
}

impl TryFrom<u32> for MouseEventKind {
    type Error = String;

    fn try_from(code: u32) -> std::result::Result<Self, String> {
        match code {
            0x0200 => Ok(MouseEventKind::Move),
            0x0201 => Ok(MouseEventKind::LeftDown),
            0x0202 => Ok(MouseEventKind::LeftUp),
            0x0204 => Ok(MouseEventKind::RightDown),
            0x0205 => Ok(MouseEventKind::RightUp),
            0x0207 => Ok(MouseEventKind::MiddleDown),
            0x0208 => Ok(MouseEventKind::MiddleUp),
            0x020A => Ok(MouseEventKind::Wheel),
            other => Err(format!("unknown mouse message code {other:#06x}")),
        }
    }
}

/// A mouse event as captured by the hook callback.
///
/// Immutable after creation; owned by the capture queue until dequeued, then
/// handed to subscribers.
#[derive(Debug, Clone, Copy)]
pub struct MouseSample {
    pub position: Position,
    pub kind: MouseEventKind,
    pub captured_at: Instant,
}

/// A keyboard event as captured by the hook callback
#[derive(Debug, Clone, Copy)]
pub struct KeySample {
    /// Virtual key code
    pub vk_code: u32,
    /// true = pressed, false = released
    pub key_down: bool,
    pub captured_at: Instant,
}

/// The unit of dispatch from the capture worker to subscribers
#[derive(Debug, Clone, Copy)]
pub enum CapturedEvent {
    Mouse(MouseSample),
    Key(KeySample),
}

impl CapturedEvent {
    pub fn captured_at(&self) -> Instant {
        match self {
            CapturedEvent::Mouse(sample) => sample.captured_at,
            CapturedEvent::Key(sample) => sample.captured_at,
        }
    }
}

/// A single persisted event.
///
/// `timestamp_ms` is milliseconds elapsed since recording start, not
/// wall-clock; within one recording it is non-decreasing in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum RecordedEvent {
    Mouse {
        x: i32,
        y: i32,
        #[serde(rename = "type")]
        kind: MouseEventKind,
        timestamp_ms: u64,
    },
    Keyboard {
        #[serde(rename = "vkCode")]
        vk_code: u32,
        #[serde(rename = "keyDown")]
        key_down: bool,
        timestamp_ms: u64,
    },
}

impl RecordedEvent {
    /// Convert a captured sample into its persisted form, stamping it with
    /// the recorder's elapsed clock
    pub fn from_sample(event: &CapturedEvent, timestamp_ms: u64) -> Self {
        match event {
            CapturedEvent::Mouse(sample) => RecordedEvent::Mouse {
                x: sample.position.x,
                y: sample.position.y,
                kind: sample.kind,
                timestamp_ms,
            },
            CapturedEvent::Key(sample) => RecordedEvent::Keyboard {
                vk_code: sample.vk_code,
                key_down: sample.key_down,
                timestamp_ms,
            },
        }
    }

    pub fn timestamp_ms(&self) -> u64 {
        match self {
            RecordedEvent::Mouse { timestamp_ms, .. } => *timestamp_ms,
            RecordedEvent::Keyboard { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    pub fn is_mouse(&self) -> bool {
        matches!(self, RecordedEvent::Mouse { .. })
    }

    pub fn is_keyboard(&self) -> bool {
        matches!(self, RecordedEvent::Keyboard { .. })
    }
}

/// A parsed recording document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// ISO-8601 wall-clock time the recording started at
    #[serde(default)]
    pub record_start_time: String,

    /// The recorded events, in emission order
    pub events: Vec<RecordedEvent>,
}

impl Recording {
    /// Parse a recording document.
    ///
    /// Fails if the document is not a JSON object carrying an `events` array;
    /// a crash-truncated recording (header written, closing brackets missing)
    /// fails here rather than at replay time.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a recording file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
