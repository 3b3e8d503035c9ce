//! The replay worker thread and its control state.
//!
//! The worker reproduces recorded inter-event delays, checking the shared
//! control state at every resumption point. All waits go through one
//! condition variable in slices of at most `WAIT_SLICE`, so stop, pause and
//! speed changes are observed within one slice even in the middle of a
//! multi-second scheduled delay.

use super::{InputInjector, ReplayOptions, ReplayStatus};
use crate::events::RecordedEvent;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Upper bound on any single blocking wait inside the worker
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// What the worker should be doing, as requested by the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Running,
    Paused,
    Stopping,
}

struct ControlState {
    phase: Phase,
    speed: f64,
}

/// Control state shared between the engine and one worker thread.
///
/// The worker reads it under the mutex; control methods mutate it and
/// notify the condition variable so any wait in progress is cut short.
pub(crate) struct ReplayControl {
    state: Mutex<ControlState>,
    wake: Condvar,
    done: Mutex<bool>,
    done_wake: Condvar,
}

impl ReplayControl {
    pub(crate) fn new(speed: f64) -> Self {
        Self {
            state: Mutex::new(ControlState {
                phase: Phase::Running,
                speed,
            }),
            wake: Condvar::new(),
            done: Mutex::new(false),
            done_wake: Condvar::new(),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.state.lock().unwrap().phase
    }

    /// A stop wins over any other phase and is never undone
    pub(crate) fn request_stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.phase = Phase::Stopping;
        self.wake.notify_all();
    }

    pub(crate) fn request_pause(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Running {
            return false;
        }
        state.phase = Phase::Paused;
        self.wake.notify_all();
        true
    }

    pub(crate) fn request_resume(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Paused {
            return false;
        }
        state.phase = Phase::Running;
        self.wake.notify_all();
        true
    }

    pub(crate) fn set_speed(&self, factor: f64) {
        let mut state = self.state.lock().unwrap();
        state.speed = factor;
        self.wake.notify_all();
    }

    pub(crate) fn is_done(&self) -> bool {
        *self.done.lock().unwrap()
    }

    fn mark_done(&self) {
        *self.done.lock().unwrap() = true;
        self.done_wake.notify_all();
    }

    /// Block until the worker reports completion or `timeout` elapses.
    /// Returns whether completion was observed.
    pub(crate) fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock().unwrap();
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self.done_wake.wait_timeout(done, deadline - now).unwrap();
            done = next;
        }
        true
    }
}

fn scaled_delay(delta_ms: u64, speed: f64) -> Duration {
    let speed = if speed > 0.0 { speed } else { 1.0 };
    Duration::from_secs_f64(delta_ms as f64 / 1000.0 / speed)
}

/// Replay loop body, run on the dedicated worker thread.
///
/// The trailing `stop_gesture_trim` events are excluded from playback.
/// Pausing during a scheduled delay skips execution and re-evaluates the
/// same index after resume, so an event is never dropped by a pause.
pub(crate) fn run(
    events: Vec<RecordedEvent>,
    options: ReplayOptions,
    control: Arc<ReplayControl>,
    status_tx: broadcast::Sender<ReplayStatus>,
    mut injector: Box<dyn InputInjector>,
) {
    let total = events.len().saturating_sub(options.stop_gesture_trim);
    let mut last_ts: u64 = 0;
    let mut index = 0usize;
    let mut stopped = false;

    info!(total, "replay worker started");

    'replay: while index < total {
        // Pause gate. Sliced so a concurrent stop still interrupts the wait.
        {
            let mut state = control.state.lock().unwrap();
            while state.phase == Phase::Paused {
                let (next, _) = control.wake.wait_timeout(state, WAIT_SLICE).unwrap();
                state = next;
            }
            if state.phase == Phase::Stopping {
                stopped = true;
                break 'replay;
            }
        }

        let event = &events[index];
        let ts = event.timestamp_ms();
        let delta = ts.saturating_sub(last_ts);
        last_ts = ts;

        // Scheduled delay, in interruptible slices. The speed divisor is
        // re-read every slice, so a speed change applies to the remainder
        // of the wait.
        let wait_start = Instant::now();
        let mut paused_during_wait = false;
        loop {
            let state = control.state.lock().unwrap();
            match state.phase {
                Phase::Stopping => {
                    stopped = true;
                    break 'replay;
                }
                Phase::Paused => {
                    paused_during_wait = true;
                    break;
                }
                Phase::Running => {}
            }

            let target = scaled_delay(delta, state.speed);
            let elapsed = wait_start.elapsed();
            if elapsed >= target {
                break;
            }
            let slice = (target - elapsed).min(WAIT_SLICE);
            let _ = control.wake.wait_timeout(state, slice).unwrap();
        }
        if paused_during_wait {
            // Same index is re-evaluated from the top; with `last_ts`
            // already advanced its remaining delay is zero after resume.
            continue;
        }

        let should_inject = match event {
            RecordedEvent::Mouse { .. } => options.replay_mouse,
            RecordedEvent::Keyboard { .. } => options.replay_keyboard,
        };
        if should_inject {
            // A stop that raced in during the final slice must win over
            // the injection.
            if control.phase() == Phase::Stopping {
                stopped = true;
                break;
            }
            if let Err(e) = injector.inject(event) {
                warn!(index, "input injection failed: {e}");
            }
        }

        index += 1;
        let _ = status_tx.send(ReplayStatus::Progress {
            current: index,
            total,
        });
    }

    let _ = status_tx.send(if stopped {
        ReplayStatus::Stopped
    } else {
        ReplayStatus::Finished
    });
    // Mark completion before notifying so anyone woken by `Completed`
    // already observes the worker as done.
    control.mark_done();
    let _ = status_tx.send(ReplayStatus::Completed { stopped });
    info!(replayed = index, total, stopped, "replay worker exited");
}
