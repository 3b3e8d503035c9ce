//! Reenact CLI
//!
//! Records system-wide mouse/keyboard activity into a timestamped JSON file
//! and replays it later with adjustable speed.
//!
//! Usage:
//!   reenact record --output session.json            # stop with Ctrl-C
//!   reenact record --output session.json --duration 30
//!   reenact replay --input session.json --speed 2.0

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reenact::{
    CaptureConfig, CaptureEngine, CapturedEvent, Recorder, ReplayCommand, ReplayEngine,
    ReplayOptions, ReplayStatus,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "reenact")]
#[command(about = "Record and replay system-wide mouse/keyboard activity")]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture input and stream it into a recording file
    Record(RecordArgs),
    /// Load a recording file and replay it
    Replay(ReplayArgs),
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Destination file for the recording
    #[arg(short, long)]
    output: PathBuf,

    /// Stop automatically after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,
}

#[derive(Parser, Debug)]
struct ReplayArgs {
    /// Recording file to replay
    #[arg(short, long)]
    input: PathBuf,

    /// Speed multiplier; recorded delays are divided by this
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Skip injection of recorded mouse events
    #[arg(long)]
    no_mouse: bool,

    /// Skip injection of recorded keyboard events
    #[arg(long)]
    no_keyboard: bool,

    /// Also replay the trailing stop-gesture events
    #[arg(long)]
    include_stop_gesture: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Record(args) => record(args).await,
        Commands::Replay(args) => replay(args).await,
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn record(args: RecordArgs) -> Result<()> {
    let mut engine = CaptureEngine::new(CaptureConfig::default());
    let mut recorder = Recorder::new();

    // Count events as they are dispatched, independent of the recorder.
    let captured = Arc::new(AtomicU64::new(0));
    let mut events = Box::pin(engine.event_stream());
    let counter = Arc::clone(&captured);
    let count_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            counter.fetch_add(1, Ordering::Relaxed);
            if let CapturedEvent::Key(sample) = event {
                tracing::debug!(vk = sample.vk_code, down = sample.key_down, "key");
            }
        }
    });

    engine.start().context("failed to start input capture")?;
    recorder
        .start_recording(&args.output, engine.subscribe())
        .await
        .with_context(|| format!("failed to open {}", args.output.display()))?;

    match args.duration {
        Some(secs) => {
            println!(
                "Recording to {} for {secs}s (Ctrl-C stops early)...",
                args.output.display()
            );
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => {
            println!(
                "Recording to {}, press Ctrl-C to stop.",
                args.output.display()
            );
            tokio::signal::ctrl_c()
                .await
                .context("failed to wait for Ctrl-C")?;
        }
    }

    recorder.stop_recording().await?;
    engine.stop();
    count_task.abort();

    println!(
        "Captured {} events into {}",
        captured.load(Ordering::Relaxed),
        args.output.display()
    );
    Ok(())
}

async fn replay(args: ReplayArgs) -> Result<()> {
    if args.speed <= 0.0 {
        bail!("--speed must be positive");
    }

    let options = ReplayOptions {
        replay_mouse: !args.no_mouse,
        replay_keyboard: !args.no_keyboard,
        speed: args.speed,
        stop_gesture_trim: if args.include_stop_gesture { 0 } else { 2 },
    };

    let engine = Arc::new(ReplayEngine::new(options));
    let loaded = engine
        .load_replay_file(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    println!(
        "Loaded {loaded} events from {}. Ctrl-C stops the replay.",
        args.input.display()
    );

    let mut status = engine.subscribe_status();
    if !engine.start_replay().context("failed to start replay")? {
        bail!("nothing to replay");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping replay...");
                let stopper = Arc::clone(&engine);
                tokio::task::spawn_blocking(move || stopper.handle_command(ReplayCommand::Stop))
                    .await
                    .context("stop task failed")?;
            }
            update = status.recv() => match update {
                Ok(ReplayStatus::Progress { current, total }) => {
                    print!("\r{current}/{total}");
                    let _ = std::io::stdout().flush();
                }
                Ok(ReplayStatus::Completed { stopped }) => {
                    println!();
                    println!("{}", if stopped { "Replay stopped." } else { "Replay finished." });
                    break;
                }
                Ok(ReplayStatus::SpeedChanged(factor)) => {
                    println!("\nSpeed set to {factor}x");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("status updates lagged, skipped {skipped}");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    Ok(())
}
