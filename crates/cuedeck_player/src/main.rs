// SPDX-License-Identifier: MIT OR Apache-2.0
//! `cuedeck` - headless cue sequence player.
//!
//! Loads a sequence file (or a built-in demo), clocks it from a simulated or
//! real audio stream, logs transport changes and cue crossings, and reads
//! transport commands from stdin.

mod commands;
mod config;
mod driver;
mod listener;

use anyhow::Context;
use clap::Parser;
use commands::{log_status, Command, HELP};
use config::{AudioBackend, PlayerConfig};
use cuedeck_sequencer::{Cue, Sequence, SequenceConfig, TickMode};
use listener::LoggingListener;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Headless cue sequence player
#[derive(Parser, Debug)]
#[command(name = "cuedeck", version, about)]
struct Args {
    /// Sequence file (RON). A demo sequence is used when omitted.
    sequence: Option<PathBuf>,

    /// Player configuration file (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Audio backend, overriding the configuration
    #[arg(short, long, value_enum)]
    audio: Option<AudioBackend>,

    /// Start playing immediately
    #[arg(long)]
    play: bool,

    /// Exit after this many seconds instead of waiting for `quit`
    #[arg(long, value_name = "SECONDS")]
    run_for: Option<f64>,

    /// Write the effective configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

fn demo_sequence(config: SequenceConfig) -> Sequence {
    let sequence = Sequence::with_config(config);
    sequence.set_name("Demo");
    sequence.set_total_time(20.0);
    sequence.set_looping(true);
    for (time, name) in [(2.0, "Intro"), (5.0, "Verse"), (9.0, "Chorus"), (14.0, "Outro")] {
        sequence.insert_cue(Cue::new(time, name));
    }
    sequence
}

/// Read stdin lines on a background thread
fn spawn_stdin_reader() -> std::io::Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn run(
    sequence: &Sequence,
    listener: &LoggingListener,
    config: &PlayerConfig,
    deadline: Option<Instant>,
) -> anyhow::Result<()> {
    let manual = config.sequence.tick_mode == TickMode::Manual;
    let status_interval = config.status_interval();
    let mut next_status = status_interval.map(|i| Instant::now() + i);
    let mut input = Some(spawn_stdin_reader().context("Failed to read stdin")?);

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("Run time elapsed");
            break;
        }

        let wait = sequence.tick_period();
        let line = match input.as_ref().map(|rx| rx.recv_timeout(wait)) {
            Some(Ok(line)) => Some(line),
            Some(Err(RecvTimeoutError::Timeout)) => None,
            Some(Err(RecvTimeoutError::Disconnected)) => {
                input = None;
                if deadline.is_none() {
                    tracing::info!("Input closed");
                    break;
                }
                None
            }
            None => {
                std::thread::sleep(wait);
                None
            }
        };

        if let Some(line) = line.filter(|l| !l.trim().is_empty()) {
            match line.parse::<Command>() {
                Ok(Command::Quit) => break,
                Ok(command) => {
                    if let Err(e) = command.execute(sequence) {
                        tracing::warn!("{e}");
                    }
                    if matches!(command, Command::AddCue(_)) {
                        listener.set_cue_times(sequence.all_cue_times(0.0, 0.0, false));
                    }
                }
                Err(e) => tracing::warn!("{e}"),
            }
        }

        if manual {
            sequence.tick();
        }
        if let (Some(at), Some(interval)) = (next_status, status_interval) {
            if Instant::now() >= at {
                log_status(sequence);
                next_status = Some(at + interval);
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("cuedeck_player=info,cuedeck_sequencer=info")
    });
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting cuedeck v{}", env!("CARGO_PKG_VERSION"));
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    if let Some(audio) = args.audio {
        config.audio = audio;
    }
    if let Some(path) = &args.write_config {
        config.save(path)?;
        tracing::info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    let sequence = match &args.sequence {
        Some(path) => Sequence::load_with_config(path, config.sequence.clone())
            .with_context(|| format!("Failed to load sequence {}", path.display()))?,
        None => {
            tracing::info!("No sequence given, using demo");
            demo_sequence(config.sequence.clone())
        }
    };

    let listener = Arc::new(LoggingListener::new(sequence.all_cue_times(0.0, 0.0, false)));
    sequence.add_listener(listener.clone());
    sequence.add_async_coalesced_listener(listener::log_notification);

    if let Some(driver) = driver::create(&config)? {
        sequence.set_audio_source(Some(driver));
    }

    sequence.end_load();
    if args.play {
        sequence.play();
    }
    log_status(&sequence);
    if args.run_for.is_none() {
        println!("{HELP}");
    }

    let deadline = args
        .run_for
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    let result = run(&sequence, &listener, &config, deadline);

    sequence.clear();
    tracing::info!("Shutting down");
    result
}
