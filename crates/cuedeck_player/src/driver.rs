// SPDX-License-Identifier: MIT OR Apache-2.0
//! Audio drivers that clock a sequence.
//!
//! This module provides:
//! - A simulated stream rendering silent blocks in real time
//! - An output-device stream using rodio (when the "audio" feature is enabled)
//!
//! Both feed an [`AudioLink`] from their own thread: block start with the
//! sample rate, then the number of frames rendered.

use crate::config::{AudioBackend, PlayerConfig};
use cuedeck_sequencer::{AudioDriver, AudioLink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Build the driver selected in `config`, if any
pub fn create(config: &PlayerConfig) -> anyhow::Result<Option<Arc<dyn AudioDriver>>> {
    let driver: Arc<dyn AudioDriver> = match config.audio {
        AudioBackend::Off => return Ok(None),
        AudioBackend::Simulated => Arc::new(SimulatedDriver::new(
            config.sample_rate,
            config.block_size,
        )),
        AudioBackend::Device => Arc::new(device::DeviceDriver::new(
            config.sample_rate,
            config.block_size,
        )?),
    };
    tracing::info!(driver = driver.name(), "Audio driver ready");
    Ok(Some(driver))
}

/// Running block feeder of a [`SimulatedDriver`]
struct Feeder {
    stop: Arc<AtomicBool>,
}

impl Drop for Feeder {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Renders silent blocks at the configured rate on a background thread
pub struct SimulatedDriver {
    sample_rate: u32,
    block_size: usize,
    feeder: Mutex<Option<Feeder>>,
}

impl SimulatedDriver {
    /// Create a driver; nothing runs until connected
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            block_size: block_size.max(1),
            feeder: Mutex::new(None),
        }
    }

    /// Real-time length of one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / f64::from(self.sample_rate))
    }

    fn spawn_feeder(&self, link: AudioLink) -> std::io::Result<Feeder> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let sample_rate = f64::from(self.sample_rate);
        let block_size = self.block_size;
        let period = self.block_duration();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        std::thread::Builder::new()
            .name("simulated-audio".into())
            .spawn(move || {
                rt.block_on(async move {
                    let mut interval = tokio::time::interval(period);
                    // Catch up after stalls, like a device draining its buffer
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
                    interval.tick().await;
                    while !stop_flag.load(Ordering::Acquire) {
                        interval.tick().await;
                        link.on_audio_block_start(sample_rate);
                        link.on_audio_block(block_size);
                    }
                    link.on_audio_stop();
                });
            })?;
        Ok(Feeder { stop })
    }
}

impl AudioDriver for SimulatedDriver {
    fn connect(&self, link: AudioLink) {
        let mut feeder = self.feeder.lock();
        feeder.take();
        match self.spawn_feeder(link) {
            Ok(running) => *feeder = Some(running),
            Err(e) => tracing::error!("Failed to start simulated audio stream: {e}"),
        }
    }

    fn disconnect(&self) {
        self.feeder.lock().take();
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

// ============================================================================
// Output device driver (with rodio)
// ============================================================================

#[cfg(feature = "audio")]
mod device {
    use super::*;
    use rodio::{OutputStream, Sink, Source};
    use std::sync::mpsc;

    /// Silent source that reports every rendered block to the link
    struct LinkSource {
        link: AudioLink,
        sample_rate: u32,
        block_size: usize,
        /// Samples rendered in the current block
        position: usize,
    }

    impl Iterator for LinkSource {
        type Item = f32;

        fn next(&mut self) -> Option<f32> {
            if self.position == 0 {
                self.link.on_audio_block_start(f64::from(self.sample_rate));
            }
            self.position += 1;
            if self.position == self.block_size {
                self.position = 0;
                self.link.on_audio_block(self.block_size);
            }
            Some(0.0)
        }
    }

    impl Source for LinkSource {
        fn current_frame_len(&self) -> Option<usize> {
            None
        }

        fn channels(&self) -> u16 {
            1
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn total_duration(&self) -> Option<Duration> {
            None
        }
    }

    enum DeviceCommand {
        Connect(AudioLink),
        Disconnect,
    }

    /// Clocks the sequence from the default output device.
    ///
    /// The output stream is not `Send`, so it lives on a dedicated thread
    /// that receives connect/disconnect commands.
    pub struct DeviceDriver {
        commands: mpsc::Sender<DeviceCommand>,
    }

    impl DeviceDriver {
        /// Open the default output device
        pub fn new(sample_rate: u32, block_size: usize) -> anyhow::Result<Self> {
            let (tx, rx) = mpsc::channel::<DeviceCommand>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

            std::thread::Builder::new()
                .name("audio-device".into())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(pair) => pair,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    let mut sink: Option<Sink> = None;
                    for command in rx {
                        // Dropping the sink stops its source
                        sink.take();
                        if let DeviceCommand::Connect(link) = command {
                            match Sink::try_new(&handle) {
                                Ok(new_sink) => {
                                    new_sink.append(LinkSource {
                                        link,
                                        sample_rate,
                                        block_size: block_size.max(1),
                                        position: 0,
                                    });
                                    sink = Some(new_sink);
                                }
                                Err(e) => tracing::error!("Failed to open audio sink: {e}"),
                            }
                        }
                    }
                    drop(sink);
                    tracing::debug!("Audio device thread exited");
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    tracing::info!("Audio device opened");
                    Ok(Self { commands: tx })
                }
                Ok(Err(e)) => anyhow::bail!("Failed to open audio device: {e}"),
                Err(_) => anyhow::bail!("Audio device thread exited during startup"),
            }
        }

        fn send(&self, command: DeviceCommand) {
            if self.commands.send(command).is_err() {
                tracing::warn!("Audio device thread is gone");
            }
        }
    }

    impl AudioDriver for DeviceDriver {
        fn connect(&self, link: AudioLink) {
            self.send(DeviceCommand::Connect(link));
        }

        fn disconnect(&self) {
            self.send(DeviceCommand::Disconnect);
        }

        fn name(&self) -> &str {
            "output device"
        }
    }
}

// ============================================================================
// Output device stub (without rodio)
// ============================================================================

#[cfg(not(feature = "audio"))]
mod device {
    use super::*;

    /// Output device driver stub; always fails to open
    pub struct DeviceDriver;

    impl DeviceDriver {
        /// Fails: audio support was not compiled in
        pub fn new(_sample_rate: u32, _block_size: usize) -> anyhow::Result<Self> {
            anyhow::bail!("Audio device support not available: compile with --features audio")
        }
    }

    impl AudioDriver for DeviceDriver {
        fn connect(&self, _link: AudioLink) {}

        fn disconnect(&self) {}
    }
}
