//! Timed replay of recorded input.
//!
//! `ReplayEngine` owns the loaded sequence and a single-use worker thread
//! that reproduces the recorded inter-event delays, scaled by a live speed
//! multiplier. The control surface (stop/pause/resume/speed) is safe to
//! call from any thread; every blocking wait inside the worker is sliced
//! and interruptible, so a stop lands within one slice no matter how long
//! the scheduled delay is.

use crate::error::Result;
use crate::events::{RecordedEvent, Recording};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

pub(crate) mod worker;

#[cfg(target_os = "windows")]
pub mod windows;

use self::worker::{Phase, ReplayControl};

/// Capacity of the status broadcast channel
const STATUS_CHANNEL_CAPACITY: usize = 256;

/// How long `stop_replay` waits for the worker before detaching it
const STOP_TIMEOUT: Duration = Duration::from_millis(3000);

/// Performs the OS-level synthesis of one recorded event.
///
/// The replay worker drives whatever implementation the engine was built
/// with; production use injects through the OS, tests substitute a
/// recording fake so the timing machinery runs on any platform.
pub trait InputInjector: Send {
    fn inject(&mut self, event: &RecordedEvent) -> Result<()>;
}

/// Options snapshotted into each replay worker at start
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Whether recorded mouse events are injected
    pub replay_mouse: bool,

    /// Whether recorded keyboard events are injected
    pub replay_keyboard: bool,

    /// Initial speed multiplier; delays are divided by this
    pub speed: f64,

    /// Number of trailing events excluded from playback.
    ///
    /// The tail of a recording is the user's stop gesture (the click or
    /// keystroke that ended the session); replaying it would immediately
    /// terminate the new session. Set to 0 to play the full sequence.
    pub stop_gesture_trim: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            replay_mouse: true,
            replay_keyboard: true,
            speed: 1.0,
            stop_gesture_trim: 2,
        }
    }
}

/// State of the replay engine as observed through the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Running,
    Paused,
    Stopping,
    Finished,
}

/// Commands accepted from an external command source (hotkeys, UI)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplayCommand {
    Stop,
    Pause,
    Resume,
    SpeedUp(f64),
}

/// Status notifications broadcast to subscribers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplayStatus {
    Started,
    Paused,
    Resumed,
    Stopping,
    Stopped,
    Finished,
    SpeedChanged(f64),
    Progress { current: usize, total: usize },
    /// The worker thread has exited
    Completed { stopped: bool },
}

struct WorkerHandle {
    control: Arc<ReplayControl>,
    thread: Option<thread::JoinHandle<()>>,
}

struct EngineInner {
    sequence: Vec<RecordedEvent>,
    options: ReplayOptions,
    worker: Option<WorkerHandle>,
}

type InjectorFactory = Box<dyn Fn() -> Box<dyn InputInjector> + Send + Sync>;

/// Loads recordings and replays them on a dedicated worker thread
pub struct ReplayEngine {
    inner: Mutex<EngineInner>,
    status_tx: broadcast::Sender<ReplayStatus>,
    injector_factory: InjectorFactory,
}

impl ReplayEngine {
    pub fn new(options: ReplayOptions) -> Self {
        Self::with_injector(options, default_injector)
    }

    /// Build an engine whose workers inject through `injector_factory`
    /// instead of the OS. Each replay gets a fresh injector.
    pub fn with_injector<F>(options: ReplayOptions, injector_factory: F) -> Self
    where
        F: Fn() -> Box<dyn InputInjector> + Send + Sync + 'static,
    {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(EngineInner {
                sequence: Vec::new(),
                options,
                worker: None,
            }),
            status_tx,
            injector_factory: Box::new(injector_factory),
        }
    }

    /// Subscribe to replay status notifications
    pub fn subscribe_status(&self) -> broadcast::Receiver<ReplayStatus> {
        self.status_tx.subscribe()
    }

    /// Get a stream of replay status notifications
    pub fn status_stream(&self) -> impl Stream<Item = ReplayStatus> {
        let mut rx = self.status_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(status) => yield status,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("status stream lagged, skipped {} updates", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Parse a recording file and store its events as the replay sequence.
    ///
    /// Fails cleanly on unreadable or malformed files without touching a
    /// running replay; workers always operate on a snapshot taken at start.
    pub fn load_replay_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let recording = Recording::load_from_file(path)?;
        let count = recording.events.len();
        self.inner.lock().unwrap().sequence = recording.events;
        info!(path = %path.display(), events = count, "replay file loaded");
        Ok(count)
    }

    /// Store an already-parsed recording as the replay sequence
    pub fn load_recording(&self, recording: Recording) {
        self.inner.lock().unwrap().sequence = recording.events;
    }

    /// Number of events currently loaded
    pub fn loaded_events(&self) -> usize {
        self.inner.lock().unwrap().sequence.len()
    }

    /// Current engine state
    pub fn state(&self) -> ReplayState {
        let inner = self.inner.lock().unwrap();
        match &inner.worker {
            Some(handle) => {
                if handle.control.is_done() {
                    ReplayState::Finished
                } else {
                    match handle.control.phase() {
                        Phase::Running => ReplayState::Running,
                        Phase::Paused => ReplayState::Paused,
                        Phase::Stopping => ReplayState::Stopping,
                    }
                }
            }
            None => ReplayState::Idle,
        }
    }

    /// Start replaying the loaded sequence on a fresh worker thread.
    ///
    /// Returns `Ok(false)` without starting anything if a replay is already
    /// in flight or no events are loaded. A worker that previously finished
    /// is reaped here; worker instances are never reused.
    pub fn start_replay(&self) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(handle) = &inner.worker {
            if !handle.control.is_done() {
                warn!("replay already running");
                return Ok(false);
            }
        }
        if inner.sequence.is_empty() {
            warn!("no replay sequence loaded");
            return Ok(false);
        }

        // Reap the finished worker so the new one starts from a clean slate.
        if let Some(mut previous) = inner.worker.take() {
            if let Some(thread) = previous.thread.take() {
                let _ = thread.join();
            }
        }

        let control = Arc::new(ReplayControl::new(inner.options.speed));
        let events = inner.sequence.clone();
        let options = inner.options.clone();
        let status_tx = self.status_tx.clone();
        let injector = (self.injector_factory)();

        let thread = thread::Builder::new().name("reenact-replay".to_string()).spawn({
            let control = Arc::clone(&control);
            move || worker::run(events, options, control, status_tx, injector)
        })?;

        inner.worker = Some(WorkerHandle {
            control,
            thread: Some(thread),
        });

        let _ = self.status_tx.send(ReplayStatus::Started);
        info!("replay started");
        Ok(true)
    }

    /// Request a stop and wait for the worker to exit, bounded by
    /// `STOP_TIMEOUT`.
    ///
    /// The stop signal wakes the worker out of any pause or delay wait. If
    /// the worker still has not exited when the timeout elapses, its handle
    /// is released and the thread left to unwind on its own; it is never
    /// force-killed. No-op when nothing is replaying.
    pub fn stop_replay(&self) {
        let handle = self.inner.lock().unwrap().worker.take();
        let Some(mut handle) = handle else {
            debug!("no replay in progress");
            return;
        };

        handle.control.request_stop();
        let _ = self.status_tx.send(ReplayStatus::Stopping);

        if handle.control.wait_done(STOP_TIMEOUT) {
            if let Some(thread) = handle.thread.take() {
                let _ = thread.join();
            }
            debug!("replay worker joined");
        } else {
            warn!(
                "replay worker did not exit within {:?}; detaching it",
                STOP_TIMEOUT
            );
        }
    }

    /// Transition Running -> Paused; no-op in any other state
    pub fn pause_replay(&self) {
        let inner = self.inner.lock().unwrap();
        if let Some(handle) = &inner.worker {
            if !handle.control.is_done() && handle.control.request_pause() {
                let _ = self.status_tx.send(ReplayStatus::Paused);
                info!("replay paused");
            }
        }
    }

    /// Transition Paused -> Running; no-op in any other state
    pub fn resume_replay(&self) {
        let inner = self.inner.lock().unwrap();
        if let Some(handle) = &inner.worker {
            if !handle.control.is_done() && handle.control.request_resume() {
                let _ = self.status_tx.send(ReplayStatus::Resumed);
                info!("replay resumed");
            }
        }
    }

    /// Update the speed multiplier read by the timing calculation.
    ///
    /// Non-positive factors are rejected. A change takes effect on the next
    /// wait slice, not retroactively.
    pub fn set_speed_multiplier(&self, factor: f64) {
        if factor <= 0.0 || !factor.is_finite() {
            warn!(factor, "ignoring non-positive speed multiplier");
            return;
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner.options.speed = factor;
            if let Some(handle) = &inner.worker {
                handle.control.set_speed(factor);
            }
        }
        let _ = self.status_tx.send(ReplayStatus::SpeedChanged(factor));
        info!(factor, "replay speed set");
    }

    /// Whether recorded mouse events are injected on the next replay
    pub fn set_replay_mouse(&self, enabled: bool) {
        self.inner.lock().unwrap().options.replay_mouse = enabled;
    }

    /// Whether recorded keyboard events are injected on the next replay
    pub fn set_replay_keyboard(&self, enabled: bool) {
        self.inner.lock().unwrap().options.replay_keyboard = enabled;
    }

    /// Apply a command from the external command source
    pub fn handle_command(&self, command: ReplayCommand) {
        match command {
            ReplayCommand::Stop => self.stop_replay(),
            ReplayCommand::Pause => self.pause_replay(),
            ReplayCommand::Resume => self.resume_replay(),
            ReplayCommand::SpeedUp(factor) => self.set_speed_multiplier(factor),
        }
    }
}

#[cfg(target_os = "windows")]
fn default_injector() -> Box<dyn InputInjector> {
    Box::new(windows::SendInputInjector)
}

#[cfg(not(target_os = "windows"))]
fn default_injector() -> Box<dyn InputInjector> {
    struct UnsupportedInjector;

    impl InputInjector for UnsupportedInjector {
        fn inject(&mut self, _event: &RecordedEvent) -> Result<()> {
            Err(crate::error::ReenactError::UnsupportedPlatform(
                "input injection is only available on Windows".to_string(),
            ))
        }
    }

    Box::new(UnsupportedInjector)
}
