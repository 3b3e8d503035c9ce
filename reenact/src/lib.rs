//! Record and replay system-wide mouse and keyboard activity on Windows.
//!
//! The pipeline has three stages: `CaptureEngine` installs low-level input
//! hooks and fans captured samples out to subscribers; `Recorder` streams
//! those samples into a timestamped JSON recording; `ReplayEngine` loads a
//! recording and reproduces it with adjustable speed, pause/resume and
//! bounded-latency cancellation.

#![cfg_attr(not(target_os = "windows"), allow(unused))]

pub mod capture;
pub mod error;
pub mod events;
pub mod record;
pub mod replay;

pub use capture::{CaptureConfig, CaptureEngine};
pub use error::{ReenactError, Result};
pub use events::{
    CapturedEvent, KeySample, MouseEventKind, MouseSample, Position, RecordedEvent, Recording,
};
pub use record::Recorder;
pub use replay::{
    InputInjector, ReplayCommand, ReplayEngine, ReplayOptions, ReplayState, ReplayStatus,
};
