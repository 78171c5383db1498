// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timeline clock.
//!
//! Owns the authoritative playhead and the timing parameters of a sequence.
//! Time advances either from wall-clock deltas or by copying the time an
//! attached audio driver accumulated on its own thread (see [`TimeSource`]).
//! Every write clamps the playhead to `[0, total_time]`.
//!
//! The clock never decides play state on its own: it is told through
//! [`TimelineClock::set_playing`] by the playback controller, and reports the
//! natural end of the timeline as [`TickOutcome::Finished`].

use crate::audio::AudioLink;
use crate::notify::SequenceEvent;
use std::time::{Duration, Instant};

/// Shortest allowed timeline, in seconds
pub const MIN_SEQUENCE_TIME: f32 = 1.0;
/// Timeline length of a new sequence, in seconds
pub const DEFAULT_TOTAL_TIME: f32 = 30.0;
/// Slowest allowed play speed
pub const MIN_PLAY_SPEED: f32 = 0.01;
/// Lowest evaluation rate
pub const MIN_FPS: u32 = 1;
/// Highest evaluation rate
pub const MAX_FPS: u32 = 500;
/// Evaluation rate of a new sequence
pub const DEFAULT_FPS: u32 = 50;

/// Where the playhead takes its time from
#[derive(Debug, Clone, Default)]
pub enum TimeSource {
    /// Wall-clock deltas scaled by play speed
    #[default]
    WallClock,
    /// Time accumulated by an audio driver
    AudioDriven(AudioLink),
}

impl TimeSource {
    /// Whether an audio driver is authoritative
    pub fn is_audio_driven(&self) -> bool {
        matches!(self, Self::AudioDriven(_))
    }

    /// The audio link, if any
    pub fn link(&self) -> Option<&AudioLink> {
        match self {
            Self::AudioDriven(link) => Some(link),
            Self::WallClock => None,
        }
    }
}

/// Result of a single [`TimelineClock::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not playing, nothing happened
    Idle,
    /// The playhead moved forward
    Advanced,
    /// The end was reached and playback wrapped around
    Looped,
    /// The end was reached without looping; playback should finish
    Finished,
}

/// Authoritative current time and timing parameters
#[derive(Debug, Clone)]
pub struct TimelineClock {
    current_time: f32,
    total_time: f32,
    play_speed: f32,
    looping: bool,
    fps: u32,
    playing: bool,
    seeking: bool,
    view_start: f32,
    view_end: f32,
    /// Time reported by the last change notification
    prev_time: f32,
    last_tick: Instant,
    source: TimeSource,
}

impl Default for TimelineClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineClock {
    /// Create a stopped clock at time 0 with default parameters
    pub fn new() -> Self {
        Self {
            current_time: 0.0,
            total_time: DEFAULT_TOTAL_TIME,
            play_speed: 1.0,
            looping: false,
            fps: DEFAULT_FPS,
            playing: false,
            seeking: false,
            view_start: 0.0,
            view_end: DEFAULT_TOTAL_TIME,
            prev_time: 0.0,
            last_tick: Instant::now(),
            source: TimeSource::WallClock,
        }
    }

    /// Current playhead position in seconds
    pub fn current_time(&self) -> f32 {
        self.current_time
    }

    /// Timeline length in seconds
    pub fn total_time(&self) -> f32 {
        self.total_time
    }

    /// Play speed factor
    pub fn play_speed(&self) -> f32 {
        self.play_speed
    }

    /// Whether playback wraps at the end
    pub fn looping(&self) -> bool {
        self.looping
    }

    /// Evaluation rate in ticks per second
    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Whether the clock is running
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether a user-initiated jump is being written right now
    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    /// Active time source
    pub fn time_source(&self) -> &TimeSource {
        &self.source
    }

    /// Whether time is driven by an audio driver
    pub fn is_audio_driven(&self) -> bool {
        self.source.is_audio_driven()
    }

    /// Interval between ticks: `1000 / fps` whole milliseconds
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(u64::from(1000 / self.fps))
    }

    /// Visible sub-range of the timeline
    pub fn view_range(&self) -> (f32, f32) {
        (self.view_start, self.view_end)
    }

    /// Smallest allowed view span.
    ///
    /// Floored at one second, or 1% of the timeline, whichever is larger.
    pub fn min_view_span(&self) -> f32 {
        MIN_SEQUENCE_TIME.max(self.total_time / 100.0)
    }

    fn clamp_time(&self, time: f32) -> f32 {
        if time.is_nan() {
            0.0
        } else {
            time.clamp(0.0, self.total_time)
        }
    }

    /// Move the playhead.
    ///
    /// Ignored while playing unless `force_over_playing` is set. `seek_mode`
    /// marks the write as a user jump. When audio-driven and playing, a
    /// non-seek write only moves the audio time; the next tick picks it up.
    pub fn set_current_time(
        &mut self,
        time: f32,
        force_over_playing: bool,
        seek_mode: bool,
        out: &mut Vec<SequenceEvent>,
    ) {
        let time = self.clamp_time(time);
        if self.playing && !force_over_playing {
            return;
        }

        self.seeking = seek_mode;
        if let TimeSource::AudioDriven(link) = &self.source {
            link.set_time(f64::from(time));
            if !self.playing || self.seeking {
                self.write_current_time(time, out);
            }
        } else {
            self.write_current_time(time, out);
        }
        self.seeking = false;
    }

    /// Store a new playhead value and notify.
    pub(crate) fn write_current_time(&mut self, time: f32, out: &mut Vec<SequenceEvent>) {
        let time = self.clamp_time(time);

        // While playing, audio time stays authoritative unless this is a seek.
        // Resync even when the playhead is unchanged: the link may hold a
        // pending jump the clock has not picked up yet.
        if let TimeSource::AudioDriven(link) = &self.source {
            if !self.playing || self.seeking {
                link.set_time(f64::from(time));
            }
        }

        if time == self.current_time {
            return;
        }
        self.current_time = time;

        out.push(SequenceEvent::CurrentTimeChanged {
            prev_time: self.prev_time,
            time,
            playing: self.playing,
        });
        self.prev_time = time;
    }

    /// Advance the playhead for one tick at instant `now`.
    pub fn advance(&mut self, now: Instant, out: &mut Vec<SequenceEvent>) -> TickOutcome {
        if !self.playing {
            return TickOutcome::Idle;
        }

        let target = match &self.source {
            TimeSource::AudioDriven(link) => link.time(),
            TimeSource::WallClock => {
                let delta = now.saturating_duration_since(self.last_tick).as_secs_f64();
                self.last_tick = now;
                f64::from(self.current_time) + delta * f64::from(self.play_speed)
            }
        };
        self.write_current_time(target as f32, out);
        tracing::trace!(time = self.current_time, "Clock advanced");

        let total = f64::from(self.total_time);
        if target < total {
            return TickOutcome::Advanced;
        }

        if self.looping {
            // Carry the overshoot so repeated loops do not drift
            out.push(SequenceEvent::Looped);
            self.prev_time = 0.0;
            let overshoot = match &self.source {
                // Rewind the link in place so blocks rendered since the read survive
                TimeSource::AudioDriven(link) => {
                    let overshoot = link.rewind(total) as f32;
                    self.write_current_time(overshoot, out);
                    overshoot
                }
                TimeSource::WallClock => {
                    let overshoot = (target - total) as f32;
                    self.set_current_time(overshoot, true, false, out);
                    overshoot
                }
            };
            tracing::debug!(overshoot, "Sequence looped");
            TickOutcome::Looped
        } else {
            TickOutcome::Finished
        }
    }

    /// Start or stop the clock. Returns whether the state changed.
    pub(crate) fn set_playing(
        &mut self,
        playing: bool,
        now: Instant,
        out: &mut Vec<SequenceEvent>,
    ) -> bool {
        if self.playing == playing {
            return false;
        }
        self.playing = playing;
        if playing {
            self.last_tick = now;
            self.prev_time = self.current_time;
        }
        if let Some(link) = self.source.link() {
            link.set_playing(playing);
        }
        out.push(SequenceEvent::PlayStateChanged { playing });
        true
    }

    /// Switch between wall-clock and audio-driven time.
    ///
    /// The new source is resynchronized to the current playhead and the
    /// wall-clock reference restarts at `now`, so switching never jumps.
    pub(crate) fn set_time_source(
        &mut self,
        source: TimeSource,
        now: Instant,
        out: &mut Vec<SequenceEvent>,
    ) {
        if let Some(old) = self.source.link() {
            old.set_playing(false);
        }
        if let Some(link) = source.link() {
            link.set_time(f64::from(self.current_time));
            link.set_play_speed(self.play_speed);
            link.set_playing(self.playing);
        }
        self.source = source;
        self.last_tick = now;
        out.push(SequenceEvent::AudioSourceChanged {
            audio_driven: self.source.is_audio_driven(),
        });
    }

    /// Change the timeline length, clamped to at least [`MIN_SEQUENCE_TIME`].
    ///
    /// Re-clamps the playhead and the view range.
    pub fn set_total_time(&mut self, total_time: f32, out: &mut Vec<SequenceEvent>) {
        if !total_time.is_finite() {
            return;
        }
        let total_time = total_time.max(MIN_SEQUENCE_TIME);
        if total_time == self.total_time {
            return;
        }
        self.total_time = total_time;
        if self.current_time > total_time {
            self.write_current_time(total_time, out);
        }
        self.clamp_view();
        out.push(SequenceEvent::TotalTimeChanged { total_time });
    }

    /// Change play speed, clamped to at least [`MIN_PLAY_SPEED`]
    pub fn set_play_speed(&mut self, speed: f32, out: &mut Vec<SequenceEvent>) {
        if !speed.is_finite() {
            return;
        }
        let speed = speed.max(MIN_PLAY_SPEED);
        if speed == self.play_speed {
            return;
        }
        self.play_speed = speed;
        if let Some(link) = self.source.link() {
            link.set_play_speed(speed);
        }
        out.push(SequenceEvent::PlaySpeedChanged { speed });
    }

    /// Enable or disable looping
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Change evaluation rate, clamped to `[MIN_FPS, MAX_FPS]`. Returns whether it changed.
    pub fn set_fps(&mut self, fps: u32) -> bool {
        let fps = fps.clamp(MIN_FPS, MAX_FPS);
        if fps == self.fps {
            return false;
        }
        self.fps = fps;
        true
    }

    /// Set the visible range, keeping it inside the timeline and at least
    /// [`min_view_span`](Self::min_view_span) wide
    pub fn set_view_range(&mut self, start: f32, end: f32) {
        self.view_start = start;
        self.view_end = end;
        self.clamp_view();
    }

    /// Move the start of the view; the end is re-clamped to keep the minimum span
    pub fn set_view_start(&mut self, start: f32) {
        self.view_start = start;
        self.clamp_view();
    }

    fn clamp_view(&mut self) {
        let span = self.min_view_span();
        let total = self.total_time;
        let start = if self.view_start.is_nan() { 0.0 } else { self.view_start };
        self.view_start = start.min(total - span).max(0.0);
        let end = if self.view_end.is_nan() { total } else { self.view_end };
        self.view_end = end.min(total).max(self.view_start + span);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing_clock(now: Instant) -> (TimelineClock, Vec<SequenceEvent>) {
        let mut clock = TimelineClock::new();
        let mut out = Vec::new();
        clock.set_playing(true, now, &mut out);
        (clock, out)
    }

    #[test]
    fn test_defaults() {
        let clock = TimelineClock::new();
        assert_eq!(clock.current_time(), 0.0);
        assert_eq!(clock.total_time(), DEFAULT_TOTAL_TIME);
        assert_eq!(clock.fps(), DEFAULT_FPS);
        assert_eq!(clock.tick_period(), Duration::from_millis(20));
        assert_eq!(clock.view_range(), (0.0, DEFAULT_TOTAL_TIME));
        assert!(!clock.is_audio_driven());
    }

    #[test]
    fn test_wall_clock_advance_scales_by_speed() {
        let t0 = Instant::now();
        let (mut clock, mut out) = playing_clock(t0);
        clock.set_play_speed(2.0, &mut out);
        out.clear();

        let outcome = clock.advance(t0 + Duration::from_millis(250), &mut out);
        assert_eq!(outcome, TickOutcome::Advanced);
        assert!((clock.current_time() - 0.5).abs() < 1e-4);
        assert!(matches!(
            out.as_slice(),
            [SequenceEvent::CurrentTimeChanged { prev_time, playing: true, .. }] if *prev_time == 0.0
        ));

        out.clear();
        clock.advance(t0 + Duration::from_millis(500), &mut out);
        assert!((clock.current_time() - 1.0).abs() < 1e-4);
        assert!(matches!(
            out.as_slice(),
            [SequenceEvent::CurrentTimeChanged { prev_time, .. }] if (*prev_time - 0.5).abs() < 1e-4
        ));
    }

    #[test]
    fn test_advance_idle_when_stopped() {
        let mut clock = TimelineClock::new();
        let mut out = Vec::new();
        let outcome = clock.advance(Instant::now() + Duration::from_secs(1), &mut out);
        assert_eq!(outcome, TickOutcome::Idle);
        assert!(out.is_empty());
    }

    #[test]
    fn test_loop_keeps_overshoot() {
        let t0 = Instant::now();
        let mut clock = TimelineClock::new();
        let mut out = Vec::new();
        clock.set_total_time(10.0, &mut out);
        clock.set_looping(true);
        clock.set_current_time(9.8, true, false, &mut out);
        clock.set_playing(true, t0, &mut out);
        out.clear();

        let outcome = clock.advance(t0 + Duration::from_millis(500), &mut out);
        assert_eq!(outcome, TickOutcome::Looped);
        assert!((clock.current_time() - 0.3).abs() < 1e-4);
        assert!(clock.is_playing());
        assert!(out.contains(&SequenceEvent::Looped));
        assert!(matches!(
            out.last(),
            Some(SequenceEvent::CurrentTimeChanged { prev_time, .. }) if *prev_time == 0.0
        ));
    }

    #[test]
    fn test_end_without_loop_reports_finished() {
        let t0 = Instant::now();
        let mut clock = TimelineClock::new();
        let mut out = Vec::new();
        clock.set_total_time(2.0, &mut out);
        clock.set_current_time(1.9, true, false, &mut out);
        clock.set_playing(true, t0, &mut out);

        let outcome = clock.advance(t0 + Duration::from_millis(300), &mut out);
        assert_eq!(outcome, TickOutcome::Finished);
        assert_eq!(clock.current_time(), 2.0);
    }

    #[test]
    fn test_set_current_time_clamps_and_respects_playing_guard() {
        let t0 = Instant::now();
        let (mut clock, mut out) = playing_clock(t0);
        clock.set_current_time(4.0, false, false, &mut out);
        assert_eq!(clock.current_time(), 0.0);

        clock.set_current_time(100.0, true, false, &mut out);
        assert_eq!(clock.current_time(), DEFAULT_TOTAL_TIME);
        clock.set_current_time(-3.0, true, false, &mut out);
        assert_eq!(clock.current_time(), 0.0);
        clock.set_current_time(f32::NAN, true, false, &mut out);
        assert_eq!(clock.current_time(), 0.0);
        assert!(!clock.is_seeking());
    }

    #[test]
    fn test_audio_driven_tick_copies_link_time() {
        let t0 = Instant::now();
        let mut clock = TimelineClock::new();
        let mut out = Vec::new();
        clock.set_current_time(7.5, true, false, &mut out);
        let link = AudioLink::new(0.0, 1.0, false);
        clock.set_time_source(TimeSource::AudioDriven(link.clone()), t0, &mut out);
        assert!((link.time() - 7.5).abs() < 1e-9);

        clock.set_playing(true, t0, &mut out);
        // No samples yet: no visible jump
        clock.advance(t0 + Duration::from_secs(5), &mut out);
        assert_eq!(clock.current_time(), 7.5);

        link.on_audio_block(44_100);
        clock.advance(t0 + Duration::from_secs(5), &mut out);
        assert!((clock.current_time() - 8.5).abs() < 1e-4);
    }

    #[test]
    fn test_audio_driven_non_seek_write_defers_to_next_tick() {
        let t0 = Instant::now();
        let mut clock = TimelineClock::new();
        let mut out = Vec::new();
        let link = AudioLink::new(0.0, 1.0, false);
        clock.set_time_source(TimeSource::AudioDriven(link.clone()), t0, &mut out);
        clock.set_playing(true, t0, &mut out);

        clock.set_current_time(3.0, true, false, &mut out);
        assert_eq!(clock.current_time(), 0.0);
        assert!((link.time() - 3.0).abs() < 1e-9);
        clock.advance(t0, &mut out);
        assert_eq!(clock.current_time(), 3.0);

        // A seek writes through immediately
        clock.set_current_time(6.0, true, true, &mut out);
        assert_eq!(clock.current_time(), 6.0);
        assert!((link.time() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_detach_resyncs_wall_clock() {
        let t0 = Instant::now();
        let mut clock = TimelineClock::new();
        let mut out = Vec::new();
        let link = AudioLink::new(0.0, 1.0, false);
        clock.set_time_source(TimeSource::AudioDriven(link.clone()), t0, &mut out);
        clock.set_playing(true, t0, &mut out);
        link.on_audio_block(44_100 * 4);
        clock.advance(t0 + Duration::from_secs(4), &mut out);

        let detach_at = t0 + Duration::from_secs(60);
        clock.set_time_source(TimeSource::WallClock, detach_at, &mut out);
        assert!(!link.is_playing());
        clock.advance(detach_at + Duration::from_millis(100), &mut out);
        assert!((clock.current_time() - 4.1).abs() < 1e-3);
    }

    #[test]
    fn test_total_time_floor_and_view_span() {
        let mut clock = TimelineClock::new();
        let mut out = Vec::new();
        clock.set_current_time(20.0, true, false, &mut out);
        clock.set_view_range(10.0, 25.0);

        clock.set_total_time(0.2, &mut out);
        assert_eq!(clock.total_time(), MIN_SEQUENCE_TIME);
        assert_eq!(clock.current_time(), MIN_SEQUENCE_TIME);
        let (start, end) = clock.view_range();
        assert!(end - start >= clock.min_view_span());
        assert!(start >= 0.0 && end <= clock.total_time());

        clock.set_total_time(1000.0, &mut out);
        assert_eq!(clock.min_view_span(), 10.0);
        clock.set_view_range(500.0, 501.0);
        let (start, end) = clock.view_range();
        assert_eq!(start, 500.0);
        assert!(end - start >= 10.0);

        clock.set_view_start(995.0);
        let (start, end) = clock.view_range();
        assert_eq!(start, 990.0);
        assert_eq!(end, 1000.0);
    }

    #[test]
    fn test_fps_and_speed_clamps() {
        let mut clock = TimelineClock::new();
        let mut out = Vec::new();
        assert!(clock.set_fps(0));
        assert_eq!(clock.fps(), MIN_FPS);
        assert_eq!(clock.tick_period(), Duration::from_millis(1000));
        clock.set_fps(10_000);
        assert_eq!(clock.fps(), MAX_FPS);
        assert_eq!(clock.tick_period(), Duration::from_millis(2));
        assert!(!clock.set_fps(MAX_FPS));

        clock.set_play_speed(-5.0, &mut out);
        assert_eq!(clock.play_speed(), MIN_PLAY_SPEED);
    }
}
