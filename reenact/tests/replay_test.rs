use reenact::{
    InputInjector, MouseEventKind, RecordedEvent, Recording, ReplayCommand, ReplayEngine,
    ReplayOptions, ReplayState, ReplayStatus, Result,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Captures every injected event with its wall-clock time instead of
/// synthesizing OS input, so the timing machinery runs on any platform.
#[derive(Clone, Default)]
struct RecordingInjector {
    log: Arc<Mutex<Vec<(RecordedEvent, Instant)>>>,
}

impl RecordingInjector {
    fn injected(&self) -> Vec<RecordedEvent> {
        self.log.lock().unwrap().iter().map(|(e, _)| e.clone()).collect()
    }

    fn count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

impl InputInjector for RecordingInjector {
    fn inject(&mut self, event: &RecordedEvent) -> Result<()> {
        self.log.lock().unwrap().push((event.clone(), Instant::now()));
        Ok(())
    }
}

fn mouse(x: i32, y: i32, kind: MouseEventKind, timestamp_ms: u64) -> RecordedEvent {
    RecordedEvent::Mouse {
        x,
        y,
        kind,
        timestamp_ms,
    }
}

fn key(vk_code: u32, key_down: bool, timestamp_ms: u64) -> RecordedEvent {
    RecordedEvent::Keyboard {
        vk_code,
        key_down,
        timestamp_ms,
    }
}

fn engine_with(events: Vec<RecordedEvent>, options: ReplayOptions) -> (ReplayEngine, RecordingInjector) {
    let injector = RecordingInjector::default();
    let factory_source = injector.clone();
    let engine = ReplayEngine::with_injector(options, move || Box::new(factory_source.clone()));
    engine.load_recording(Recording {
        record_start_time: String::new(),
        events,
    });
    (engine, injector)
}

/// Drain the status channel until the worker reports completion.
async fn wait_for_completion(status: &mut broadcast::Receiver<ReplayStatus>) -> bool {
    let completion = async {
        loop {
            match status.recv().await {
                Ok(ReplayStatus::Completed { stopped }) => return stopped,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("status channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), completion)
        .await
        .expect("replay did not complete in time")
}

#[tokio::test]
async fn replays_all_but_the_stop_gesture_with_recorded_pacing() {
    // The last two events are the stop gesture and must not be replayed;
    // the rest are paced by their timestamp deltas: 0, 5, 3 and 32 ms.
    let events = vec![
        mouse(0, 0, MouseEventKind::Move, 0),
        mouse(10, 0, MouseEventKind::Move, 5),
        key(66, true, 8),
        key(66, false, 40),
        mouse(10, 0, MouseEventKind::LeftDown, 42),
        mouse(10, 0, MouseEventKind::LeftUp, 44),
    ];
    let expected: Vec<RecordedEvent> = events[..4].to_vec();

    let (engine, injector) = engine_with(events, ReplayOptions::default());
    let mut status = engine.subscribe_status();

    let started = Instant::now();
    assert!(engine.start_replay().expect("start"));
    let stopped = wait_for_completion(&mut status).await;
    let elapsed = started.elapsed();

    assert!(!stopped);
    assert_eq!(injector.injected(), expected);
    assert!(
        elapsed >= Duration::from_millis(35),
        "recorded deltas were not honored: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(500),
        "replay took far longer than the recorded span: {elapsed:?}"
    );
    assert_eq!(engine.state(), ReplayState::Finished);
}

#[tokio::test]
async fn doubling_the_speed_roughly_halves_the_wall_time() {
    // Five events 100 ms apart, plus a two-event stop gesture.
    let mut events: Vec<RecordedEvent> = (0..5)
        .map(|i| key(65 + i as u32, true, i * 100))
        .collect();
    events.push(mouse(0, 0, MouseEventKind::LeftDown, 400));
    events.push(mouse(0, 0, MouseEventKind::LeftUp, 400));

    let at_speed = |speed: f64| {
        let events = events.clone();
        async move {
            let options = ReplayOptions {
                speed,
                ..Default::default()
            };
            let (engine, injector) = engine_with(events, options);
            let mut status = engine.subscribe_status();
            let started = Instant::now();
            assert!(engine.start_replay().expect("start"));
            wait_for_completion(&mut status).await;
            assert_eq!(injector.count(), 5);
            started.elapsed()
        }
    };

    let normal = at_speed(1.0).await;
    let double = at_speed(2.0).await;

    assert!(
        normal >= Duration::from_millis(300),
        "speed 1.0 finished too fast: {normal:?}"
    );
    assert!(
        double <= Duration::from_millis(350),
        "speed 2.0 finished too slowly: {double:?}"
    );
    assert!(double < normal);
}

#[tokio::test]
async fn pause_and_resume_never_skip_or_duplicate_events() {
    let mut events: Vec<RecordedEvent> = (0..6)
        .map(|i| key(65 + i as u32, true, i * 120))
        .collect();
    events.push(mouse(0, 0, MouseEventKind::LeftDown, 600));
    events.push(mouse(0, 0, MouseEventKind::LeftUp, 600));
    let expected: Vec<RecordedEvent> = events[..6].to_vec();

    let (engine, injector) = engine_with(events, ReplayOptions::default());
    let mut status = engine.subscribe_status();
    assert!(engine.start_replay().expect("start"));

    tokio::time::sleep(Duration::from_millis(250)).await;
    engine.pause_replay();
    assert_eq!(engine.state(), ReplayState::Paused);
    let frozen = injector.count();
    assert!(frozen > 0, "pause landed before anything was replayed");

    // An arbitrary pause length must not advance the sequence.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(injector.count(), frozen);

    engine.resume_replay();
    let stopped = wait_for_completion(&mut status).await;

    assert!(!stopped);
    assert_eq!(injector.injected(), expected);
}

#[tokio::test]
async fn stop_interrupts_a_long_scheduled_wait_quickly() {
    // The second event is scheduled 10 s after the first; a stop issued
    // during that wait must land within a wait slice, not after 10 s.
    let events = vec![
        key(65, true, 0),
        key(65, false, 10_000),
        mouse(0, 0, MouseEventKind::LeftDown, 10_000),
        mouse(0, 0, MouseEventKind::LeftUp, 10_000),
    ];

    let (engine, injector) = engine_with(events, ReplayOptions::default());
    let mut status = engine.subscribe_status();
    assert!(engine.start_replay().expect("start"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(injector.count(), 1);

    let stop_issued = Instant::now();
    engine.stop_replay();
    let stop_latency = stop_issued.elapsed();

    assert!(
        stop_latency < Duration::from_millis(1000),
        "stop took {stop_latency:?}"
    );
    let stopped = wait_for_completion(&mut status).await;
    assert!(stopped);
    assert_eq!(injector.count(), 1, "no event may be injected after stop");
    assert_eq!(engine.state(), ReplayState::Idle);
}

#[tokio::test]
async fn start_is_rejected_while_running_or_without_a_sequence() {
    let injector = RecordingInjector::default();
    let factory_source = injector.clone();
    let engine = ReplayEngine::with_injector(ReplayOptions::default(), move || {
        Box::new(factory_source.clone())
    });

    // Nothing loaded yet.
    assert!(!engine.start_replay().expect("empty start"));
    assert_eq!(engine.state(), ReplayState::Idle);

    engine.load_recording(Recording {
        record_start_time: String::new(),
        events: vec![
            key(65, true, 0),
            key(65, false, 5_000),
            mouse(0, 0, MouseEventKind::LeftDown, 5_000),
            mouse(0, 0, MouseEventKind::LeftUp, 5_000),
        ],
    });

    assert!(engine.start_replay().expect("start"));
    assert!(!engine.start_replay().expect("second start"));
    engine.stop_replay();
}

#[tokio::test]
async fn the_trim_policy_is_overridable() {
    let events = vec![
        key(65, true, 0),
        key(65, false, 10),
        key(66, true, 20),
    ];

    let options = ReplayOptions {
        stop_gesture_trim: 0,
        ..Default::default()
    };
    let (engine, injector) = engine_with(events.clone(), options);
    let mut status = engine.subscribe_status();
    assert!(engine.start_replay().expect("start"));
    wait_for_completion(&mut status).await;

    assert_eq!(injector.injected(), events);
}

#[tokio::test]
async fn disabled_categories_are_paced_but_not_injected() {
    let events = vec![
        mouse(1, 1, MouseEventKind::Move, 0),
        key(65, true, 10),
        mouse(2, 2, MouseEventKind::Move, 20),
        key(65, false, 30),
        mouse(0, 0, MouseEventKind::LeftDown, 40),
        mouse(0, 0, MouseEventKind::LeftUp, 42),
    ];

    let options = ReplayOptions {
        replay_mouse: false,
        ..Default::default()
    };
    let (engine, injector) = engine_with(events, options);
    let mut status = engine.subscribe_status();

    let mut progress_total = None;
    assert!(engine.start_replay().expect("start"));
    let drained = async {
        loop {
            match status.recv().await {
                Ok(ReplayStatus::Progress { total, .. }) => progress_total = Some(total),
                Ok(ReplayStatus::Completed { .. }) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), drained)
        .await
        .expect("replay did not complete");

    // Only the keyboard events were injected, but progress covered all four.
    let injected = injector.injected();
    assert_eq!(injected.len(), 2);
    assert!(injected.iter().all(|e| e.is_keyboard()));
    assert_eq!(progress_total, Some(4));
}

#[tokio::test]
async fn a_finished_engine_can_start_a_fresh_worker() {
    let events = vec![
        key(65, true, 0),
        key(65, false, 10),
        mouse(0, 0, MouseEventKind::LeftDown, 20),
        mouse(0, 0, MouseEventKind::LeftUp, 22),
    ];

    let (engine, injector) = engine_with(events, ReplayOptions::default());
    let mut status = engine.subscribe_status();

    assert!(engine.start_replay().expect("first run"));
    wait_for_completion(&mut status).await;
    assert_eq!(engine.state(), ReplayState::Finished);
    assert_eq!(injector.count(), 2);

    // The finished worker is single-use; a new start spawns a fresh one.
    assert!(engine.start_replay().expect("second run"));
    wait_for_completion(&mut status).await;
    assert_eq!(injector.count(), 4);
}

#[tokio::test]
async fn commands_map_onto_the_control_surface() {
    let mut events: Vec<RecordedEvent> = (0..4)
        .map(|i| key(65 + i as u32, true, i * 200))
        .collect();
    events.push(mouse(0, 0, MouseEventKind::LeftDown, 800));
    events.push(mouse(0, 0, MouseEventKind::LeftUp, 800));

    let (engine, _injector) = engine_with(events, ReplayOptions::default());
    let mut status = engine.subscribe_status();
    assert!(engine.start_replay().expect("start"));

    engine.handle_command(ReplayCommand::Pause);
    assert_eq!(engine.state(), ReplayState::Paused);

    engine.handle_command(ReplayCommand::SpeedUp(2.0));
    engine.handle_command(ReplayCommand::Resume);
    assert_eq!(engine.state(), ReplayState::Running);

    engine.handle_command(ReplayCommand::Stop);
    assert_eq!(engine.state(), ReplayState::Idle);

    // The status stream reflects the transitions in order.
    let mut seen = Vec::new();
    while let Ok(update) = status.try_recv() {
        seen.push(update);
    }
    assert!(seen.contains(&ReplayStatus::Started));
    assert!(seen.contains(&ReplayStatus::Paused));
    assert!(seen.contains(&ReplayStatus::SpeedChanged(2.0)));
    assert!(seen.contains(&ReplayStatus::Resumed));
    assert!(seen.contains(&ReplayStatus::Stopping));
    assert!(seen.contains(&ReplayStatus::Stopped));
}

#[tokio::test]
async fn a_non_positive_speed_is_ignored() {
    let (engine, _injector) = engine_with(
        vec![
            key(65, true, 0),
            mouse(0, 0, MouseEventKind::LeftDown, 10),
            mouse(0, 0, MouseEventKind::LeftUp, 12),
        ],
        ReplayOptions::default(),
    );
    let mut status = engine.subscribe_status();

    engine.set_speed_multiplier(0.0);
    engine.set_speed_multiplier(-3.0);
    engine.set_speed_multiplier(2.5);

    let mut changes = Vec::new();
    while let Ok(update) = status.try_recv() {
        if let ReplayStatus::SpeedChanged(factor) = update {
            changes.push(factor);
        }
    }
    assert_eq!(changes, vec![2.5]);
}
