// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transport state machine.
//!
//! Discrete triggers move the sequence between [`PlaybackState`]s and drive
//! the [`TimelineClock`]. The controller is the only writer of the clock's
//! running flag.

use crate::clock::TimelineClock;
use crate::cue::CueStore;
use crate::notify::SequenceEvent;
use std::fmt;
use std::time::Instant;

/// Threshold used by the previous-cue trigger, in seconds
pub const PREV_CUE_THRESHOLD: f32 = 1.0;

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Not running, playhead reset
    #[default]
    Stopped,
    /// Clock is advancing
    Playing,
    /// Not running, playhead retained
    Paused,
}

impl PlaybackState {
    /// Check if currently playing
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }

    /// Check if paused
    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Paused)
    }

    /// Check if stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self, PlaybackState::Stopped)
    }
}

/// Fire-and-forget transport command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Start playing, rewinding first if at the end
    Play,
    /// Stop and rewind to 0
    Stop,
    /// Stop, keeping the playhead
    Pause,
    /// Pause if playing, otherwise play
    TogglePlay,
    /// Jump to the previous enabled cue
    PrevCue,
    /// Jump to the next enabled cue
    NextCue,
}

impl Trigger {
    /// Every trigger, in menu order
    pub const ALL: [Trigger; 6] = [
        Trigger::Play,
        Trigger::Stop,
        Trigger::Pause,
        Trigger::TogglePlay,
        Trigger::PrevCue,
        Trigger::NextCue,
    ];

    /// Short lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Play => "play",
            Trigger::Stop => "stop",
            Trigger::Pause => "pause",
            Trigger::TogglePlay => "toggle",
            Trigger::PrevCue => "prev",
            Trigger::NextCue => "next",
        }
    }

    /// Look a trigger up by its [`name`](Self::name)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Applies triggers to a clock
#[derive(Debug, Clone, Default)]
pub struct PlaybackController {
    state: PlaybackState,
}

impl PlaybackController {
    /// Create a stopped controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Current transport state
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Apply `trigger`, pushing resulting notifications into `out`
    pub fn fire(
        &mut self,
        trigger: Trigger,
        clock: &mut TimelineClock,
        cues: &mut CueStore,
        now: Instant,
        out: &mut Vec<SequenceEvent>,
    ) {
        match trigger {
            Trigger::Play => self.play(clock, now, out),
            Trigger::Stop => self.stop(clock, now, out),
            Trigger::Pause => self.pause(clock, now, out),
            Trigger::TogglePlay => {
                if self.state.is_playing() {
                    self.pause(clock, now, out);
                } else {
                    self.play(clock, now, out);
                }
            }
            Trigger::PrevCue => {
                cues.reorder_if_dirty();
                let current = clock.current_time();
                let target = cues.previous(current, PREV_CUE_THRESHOLD, false);
                tracing::debug!(from = current, to = target, "Jump to previous cue");
                clock.set_current_time(target, true, false, out);
            }
            Trigger::NextCue => {
                cues.reorder_if_dirty();
                let current = clock.current_time();
                let target = cues.next(current, false);
                tracing::debug!(from = current, to = target, "Jump to next cue");
                clock.set_current_time(target, true, false, out);
            }
        }
    }

    fn play(&mut self, clock: &mut TimelineClock, now: Instant, out: &mut Vec<SequenceEvent>) {
        if clock.current_time() >= clock.total_time() {
            clock.write_current_time(0.0, out);
        }
        clock.set_playing(true, now, out);
        if self.state != PlaybackState::Playing {
            tracing::info!(time = clock.current_time(), "Playback started");
        }
        self.state = PlaybackState::Playing;
    }

    fn stop(&mut self, clock: &mut TimelineClock, now: Instant, out: &mut Vec<SequenceEvent>) {
        clock.set_playing(false, now, out);
        clock.write_current_time(0.0, out);
        if self.state != PlaybackState::Stopped {
            tracing::info!("Playback stopped");
        }
        self.state = PlaybackState::Stopped;
    }

    fn pause(&mut self, clock: &mut TimelineClock, now: Instant, out: &mut Vec<SequenceEvent>) {
        clock.set_playing(false, now, out);
        if self.state == PlaybackState::Playing {
            tracing::info!(time = clock.current_time(), "Playback paused");
            self.state = PlaybackState::Paused;
        }
    }

    /// Natural end of a non-looping timeline. The playhead stays at the end.
    pub(crate) fn finish(
        &mut self,
        clock: &mut TimelineClock,
        now: Instant,
        out: &mut Vec<SequenceEvent>,
    ) {
        clock.set_playing(false, now, out);
        if self.state == PlaybackState::Playing {
            tracing::info!(time = clock.current_time(), "Playback finished");
            self.state = PlaybackState::Paused;
        }
    }
}
