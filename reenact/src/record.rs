//! Streaming recorder.
//!
//! Captured samples are stamped with a monotonic elapsed clock and handed to
//! a single writer thread, which streams them into the destination file as
//! they arrive. The header goes out before the first event, so a process
//! crash mid-recording still leaves a recognizable (if unparseable) prefix
//! on disk while memory use stays constant for arbitrarily long sessions.

use crate::error::Result;
use crate::events::{CapturedEvent, RecordedEvent};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task;
use tracing::{debug, info, warn};

struct ActiveRecording {
    path: PathBuf,
    started_at: Instant,
    forward: task::JoinHandle<u64>,
    writer: Option<JoinHandle<io::Result<u64>>>,
}

/// Streams captured events into a recording file
#[derive(Default)]
pub struct Recorder {
    active: Option<ActiveRecording>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Time since the current recording started, if one is active
    pub fn elapsed(&self) -> Option<Duration> {
        self.active.as_ref().map(|a| a.started_at.elapsed())
    }

    /// Open `path` for streaming write and start recording events from
    /// `events`.
    ///
    /// No-op if already recording. Each received event is stamped with the
    /// elapsed clock at conversion time, so `timestamp_ms` is non-decreasing
    /// in emission order.
    pub async fn start_recording<P: AsRef<Path>>(
        &mut self,
        path: P,
        mut events: broadcast::Receiver<CapturedEvent>,
    ) -> Result<()> {
        if self.active.is_some() {
            debug!("recorder already running");
            return Ok(());
        }

        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let (writer_tx, writer) = spawn_writer(file);
        let started_at = Instant::now();

        let forward = task::spawn(async move {
            let mut forwarded = 0u64;
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let timestamp_ms = started_at.elapsed().as_millis() as u64;
                        let recorded = RecordedEvent::from_sample(&event, timestamp_ms);
                        if writer_tx.send(recorded).is_err() {
                            break;
                        }
                        forwarded += 1;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("recorder lagged, skipped {} captured events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            forwarded
        });

        info!(path = %path.display(), "recording started");
        self.active = Some(ActiveRecording {
            path,
            started_at,
            forward,
            writer: Some(writer),
        });
        Ok(())
    }

    /// Stop recording, finish the file and release it.
    ///
    /// No-op if not recording. The writer drains everything still queued,
    /// appends the footer and closes the file before this returns.
    pub async fn stop_recording(&mut self) -> Result<()> {
        let Some(mut active) = self.active.take() else {
            debug!("recorder is not running");
            return Ok(());
        };

        // Cancelling the forwarding task drops the writer's sender; the
        // writer drains the queue, writes the footer and exits.
        active.forward.abort();
        let _ = (&mut active.forward).await;

        if let Some(writer) = active.writer.take() {
            match writer.join() {
                Ok(Ok(written)) => {
                    info!(events = written, path = %active.path.display(), "recording stopped");
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => warn!("recorder writer thread panicked"),
            }
        }
        Ok(())
    }
}

/// Spawn the single writer thread for one recording.
///
/// The header is written (and flushed) before any event so that the file
/// carries a valid prefix from the first moment of the session. Events are
/// written strictly in the order they were enqueued.
fn spawn_writer(file: File) -> (Sender<RecordedEvent>, JoinHandle<io::Result<u64>>) {
    let (tx, rx) = mpsc::channel::<RecordedEvent>();

    let handle = thread::spawn(move || -> io::Result<u64> {
        let mut out = BufWriter::new(file);
        let start_time = chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false);
        write!(
            out,
            "{{\n  \"record_start_time\": \"{start_time}\",\n  \"events\": [\n"
        )?;
        out.flush()?;

        let mut written = 0u64;
        while let Ok(event) = rx.recv() {
            if written > 0 {
                out.write_all(b",\n")?;
            }
            out.write_all(b"    ")?;
            serde_json::to_writer(&mut out, &event)?;
            written += 1;
        }

        out.write_all(b"\n  ]\n}\n")?;
        out.flush()?;
        debug!("recorder writer exited after {written} events");
        Ok(written)
    });

    (tx, handle)
}
