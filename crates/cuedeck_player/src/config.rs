// SPDX-License-Identifier: MIT OR Apache-2.0
//! Player configuration, stored as RON.

use anyhow::Context;
use clap::ValueEnum;
use cuedeck_sequencer::{SequenceConfig, DEFAULT_SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which audio driver clocks the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum AudioBackend {
    /// Wall-clock time only
    Off,
    /// A software stream that renders silence in real time
    #[default]
    Simulated,
    /// The default output device (requires the `audio` feature)
    Device,
}

/// Player settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Sequence runtime settings
    pub sequence: SequenceConfig,
    /// Audio driver selection
    pub audio: AudioBackend,
    /// Sample rate of the simulated and device streams, in Hz
    pub sample_rate: u32,
    /// Frames per audio block
    pub block_size: usize,
    /// Interval between status lines, in milliseconds (0 disables them)
    pub status_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sequence: SequenceConfig::default(),
            audio: AudioBackend::default(),
            sample_rate: DEFAULT_SAMPLE_RATE as u32,
            block_size: 512,
            status_interval_ms: 1000,
        }
    }
}

impl PlayerConfig {
    /// Load from a RON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: PlayerConfig = ron::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config.sanitized())
    }

    /// Save to a RON file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let pretty = ron::ser::PrettyConfig::default().struct_names(true);
        let content = ron::ser::to_string_pretty(self, pretty)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }

    fn sanitized(mut self) -> Self {
        if self.sample_rate == 0 {
            tracing::warn!("Config sample_rate is 0, using {DEFAULT_SAMPLE_RATE}");
            self.sample_rate = DEFAULT_SAMPLE_RATE as u32;
        }
        if self.block_size == 0 {
            tracing::warn!("Config block_size is 0, using 512");
            self.block_size = 512;
        }
        self
    }

    /// Interval between status lines, if enabled
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_ms > 0).then(|| Duration::from_millis(self.status_interval_ms))
    }
}
