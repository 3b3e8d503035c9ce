//! System-wide input capture.
//!
//! `CaptureEngine` installs low-level mouse and keyboard hooks on a dedicated
//! hook thread and fans captured samples out to subscribers through a
//! broadcast channel. The hook callbacks do nothing but classify, throttle
//! and enqueue; a separate dispatch worker drains the queue so a slow
//! subscriber can never stall the OS callback.

use crate::error::Result;
use crate::events::{CapturedEvent, Position};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(not(target_os = "windows"))]
use crate::error::ReenactError;

/// Capacity of the subscriber broadcast channel. Mouse moves arrive in
/// bursts; a subscriber that falls further behind than this sees a lag
/// notification rather than blocking the dispatch worker.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How long the dispatch worker waits for new samples before re-checking
/// the stop flag.
const DISPATCH_IDLE_WAIT: Duration = Duration::from_millis(5);

/// Configuration for the capture engine
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Whether mouse events are captured
    pub capture_mouse: bool,

    /// Whether keyboard events are captured
    pub capture_keyboard: bool,

    /// Minimum Manhattan distance (pixels) between accepted mouse moves
    pub mouse_move_min_distance: i32,

    /// Minimum interval between accepted mouse moves
    pub mouse_move_min_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_mouse: true,
            capture_keyboard: true,
            mouse_move_min_distance: 3,
            mouse_move_min_interval: Duration::from_millis(5),
        }
    }
}

/// Drop policy for high-frequency mouse-move samples.
///
/// A move is dropped only when it is both closer than the distance bound to
/// the last accepted move and earlier than the interval bound after it;
/// every accepted move becomes the new reference point. Button and wheel
/// events bypass the throttle entirely.
#[derive(Debug, Default)]
pub(crate) struct MoveThrottle {
    last_accepted: Option<(Position, Instant)>,
}

impl MoveThrottle {
    pub(crate) fn accept(
        &mut self,
        position: Position,
        now: Instant,
        min_distance: i32,
        min_interval: Duration,
    ) -> bool {
        if let Some((last_position, last_time)) = self.last_accepted {
            if position.manhattan_distance(&last_position) < min_distance
                && now.duration_since(last_time) < min_interval
            {
                return false;
            }
        }
        self.last_accepted = Some((position, now));
        true
    }
}

struct CaptureSession {
    stop: Arc<AtomicBool>,
    hook_thread: JoinHandle<()>,
    hook_thread_id: u32,
    worker: JoinHandle<()>,
}

/// Captures system-wide mouse and keyboard input and dispatches it to
/// subscribers
pub struct CaptureEngine {
    config: CaptureConfig,
    event_tx: broadcast::Sender<CapturedEvent>,
    session: Option<CaptureSession>,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            event_tx,
            session: None,
        }
    }

    /// Subscribe to captured events. Each subscriber sees every event
    /// dispatched after the subscription, in dispatch order.
    pub fn subscribe(&self) -> broadcast::Receiver<CapturedEvent> {
        self.event_tx.subscribe()
    }

    /// Get a stream of captured events
    pub fn event_stream(&self) -> impl Stream<Item = CapturedEvent> {
        let mut rx = self.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("capture stream lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Install the system-wide hooks and start the dispatch worker.
    ///
    /// No-op if already running. If either hook fails to install, any
    /// partially-installed hook is removed, no worker is started, and the
    /// error is returned to the caller; the engine does not retry.
    pub fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("capture engine already running");
            return Ok(());
        }

        #[cfg(target_os = "windows")]
        {
            let (sample_tx, sample_rx) = std::sync::mpsc::channel();
            let (hook_thread, hook_thread_id) =
                windows::install_hooks(self.config.clone(), sample_tx)?;

            let stop = Arc::new(AtomicBool::new(false));
            let worker = spawn_dispatch_worker(sample_rx, self.event_tx.clone(), Arc::clone(&stop));

            self.session = Some(CaptureSession {
                stop,
                hook_thread,
                hook_thread_id,
                worker,
            });

            info!("capture engine started");
            Ok(())
        }

        #[cfg(not(target_os = "windows"))]
        {
            Err(ReenactError::UnsupportedPlatform(
                "system-wide input hooks are only available on Windows".to_string(),
            ))
        }
    }

    /// Remove the hooks and shut down the dispatch worker.
    ///
    /// Idempotent; joins both threads before returning so no callback can
    /// fire after this completes.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.stop.store(true, Ordering::SeqCst);

        #[cfg(target_os = "windows")]
        windows::request_hook_shutdown(session.hook_thread_id);

        if session.hook_thread.join().is_err() {
            warn!("hook thread panicked during shutdown");
        }

        // The hook thread dropped the sample sender on exit; the worker
        // drains whatever is left and observes the closed channel.
        if session.worker.join().is_err() {
            warn!("capture dispatch worker panicked during shutdown");
        }

        info!("capture engine stopped");
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drains the sample queue and delivers one sample at a time to all current
/// subscribers. A broadcast send never blocks, so producers are isolated
/// from subscriber latency.
fn spawn_dispatch_worker(
    sample_rx: Receiver<CapturedEvent>,
    event_tx: broadcast::Sender<CapturedEvent>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            match sample_rx.recv_timeout(DISPATCH_IDLE_WAIT) {
                Ok(sample) => {
                    // A send only errors when nobody is subscribed; capture
                    // keeps running so later subscribers see new events.
                    let _ = event_tx.send(sample);
                    while let Ok(queued) = sample_rx.try_recv() {
                        let _ = event_tx.send(queued);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("capture dispatch worker exited");
    })
}
