// SPDX-License-Identifier: MIT OR Apache-2.0
//! Listener that reports sequence changes through tracing.

use cuedeck_sequencer::{SequenceListener, SequenceNotification};
use parking_lot::Mutex;

/// Logs transport changes and cue crossings
pub struct LoggingListener {
    /// Cue times, ascending, used to report crossings during playback
    cue_times: Mutex<Vec<f32>>,
}

impl LoggingListener {
    /// Create a listener that reports crossings of `cue_times`
    pub fn new(cue_times: Vec<f32>) -> Self {
        Self {
            cue_times: Mutex::new(cue_times),
        }
    }

    /// Replace the cue times after the cue list changed
    pub fn set_cue_times(&self, cue_times: Vec<f32>) {
        *self.cue_times.lock() = cue_times;
    }

    /// Cue times in `(prev_time, time]`
    pub fn crossed(&self, prev_time: f32, time: f32) -> Vec<f32> {
        self.cue_times
            .lock()
            .iter()
            .copied()
            .filter(|&t| t > prev_time && t <= time)
            .collect()
    }
}

impl SequenceListener for LoggingListener {
    fn play_state_changed(&self, playing: bool) {
        tracing::info!(playing, "Play state changed");
    }

    fn current_time_changed(&self, prev_time: f32, time: f32, playing: bool) {
        if !playing {
            tracing::debug!(time, "Playhead moved");
            return;
        }
        for cue in self.crossed(prev_time, time) {
            tracing::info!(cue, "Cue reached");
        }
    }

    fn looped(&self) {
        tracing::info!("Looped");
    }

    fn play_speed_changed(&self, speed: f32) {
        tracing::info!(speed, "Play speed changed");
    }

    fn total_time_changed(&self, total_time: f32) {
        tracing::info!(total_time, "Total time changed");
    }

    fn audio_source_changed(&self, audio_driven: bool) {
        tracing::info!(audio_driven, "Time source changed");
    }

    fn editing_state_changed(&self, editing: bool) {
        tracing::debug!(editing, "Editing state changed");
    }
}

/// Async coalesced observer
pub fn log_notification(notification: &SequenceNotification) {
    match notification {
        SequenceNotification::PlayStateChanged { playing } => {
            tracing::debug!(playing, "Async play state");
        }
        SequenceNotification::EditingStateChanged { editing } => {
            tracing::info!(editing, "Async editing state");
        }
    }
}
