// SPDX-License-Identifier: MIT OR Apache-2.0
//! Audio-linked time source.
//!
//! When an audio driver is attached, the sequence clock stops measuring
//! wall-clock deltas and instead copies the time accumulated here by the
//! driver's callback. The callback side ([`AudioLink::on_audio_block_start`],
//! [`AudioLink::on_audio_block`], [`AudioLink::on_audio_stop`]) only touches
//! atomics: it never locks, allocates or logs.
//!
//! `f64` values are stored as raw bits in `AtomicU64`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Sample rate assumed until the driver reports one
pub const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;

struct LinkState {
    /// Accumulated audio time in seconds (f64 bits)
    hi_res_time_bits: AtomicU64,
    /// Device sample rate in Hz (f64 bits)
    sample_rate_bits: AtomicU64,
    /// Mirror of the sequence play speed (f32 bits)
    play_speed_bits: AtomicU32,
    /// Mirror of the sequence play state
    playing: AtomicBool,
}

/// Shared handle between the sequence clock and an audio callback.
///
/// Cloning is cheap; all clones see the same counters.
#[derive(Clone)]
pub struct AudioLink {
    state: Arc<LinkState>,
}

impl AudioLink {
    /// Create a link starting at `time` seconds
    pub fn new(time: f64, play_speed: f32, playing: bool) -> Self {
        Self {
            state: Arc::new(LinkState {
                hi_res_time_bits: AtomicU64::new(time.to_bits()),
                sample_rate_bits: AtomicU64::new(DEFAULT_SAMPLE_RATE.to_bits()),
                play_speed_bits: AtomicU32::new(play_speed.to_bits()),
                playing: AtomicBool::new(playing),
            }),
        }
    }

    /// Refresh the cached device sample rate. Zero or invalid rates are ignored.
    pub fn on_audio_block_start(&self, sample_rate: f64) {
        if sample_rate.is_finite() && sample_rate > 0.0 {
            self.state
                .sample_rate_bits
                .store(sample_rate.to_bits(), Ordering::Relaxed);
        }
    }

    /// Account for `num_samples` frames rendered by the device.
    ///
    /// Advances only while the sequence is playing. Uses a CAS loop so a seek
    /// written concurrently from another thread is never overwritten.
    pub fn on_audio_block(&self, num_samples: usize) {
        if !self.state.playing.load(Ordering::Acquire) {
            return;
        }
        let delta = num_samples as f64 / self.sample_rate() * f64::from(self.play_speed());
        let _ = self.state.hi_res_time_bits.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |bits| Some((f64::from_bits(bits) + delta).to_bits()),
        );
    }

    /// The device stopped. Nothing to do: time simply stops accumulating.
    pub fn on_audio_stop(&self) {}

    /// Accumulated audio time in seconds
    pub fn time(&self) -> f64 {
        f64::from_bits(self.state.hi_res_time_bits.load(Ordering::Acquire))
    }

    /// Cached device sample rate
    pub fn sample_rate(&self) -> f64 {
        f64::from_bits(self.state.sample_rate_bits.load(Ordering::Relaxed))
    }

    /// Whether the sequence is currently playing
    pub fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::Acquire)
    }

    pub(crate) fn set_time(&self, time: f64) {
        self.state
            .hi_res_time_bits
            .store(time.to_bits(), Ordering::Release);
    }

    /// Subtract `by` seconds from the accumulated time, floored at zero.
    /// Returns the new time.
    pub(crate) fn rewind(&self, by: f64) -> f64 {
        let rewound = |time: f64| (time - by).max(0.0);
        let prev = self
            .state
            .hi_res_time_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(rewound(f64::from_bits(bits)).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        rewound(f64::from_bits(prev))
    }

    pub(crate) fn set_playing(&self, playing: bool) {
        self.state.playing.store(playing, Ordering::Release);
    }

    pub(crate) fn set_play_speed(&self, speed: f32) {
        self.state
            .play_speed_bits
            .store(speed.to_bits(), Ordering::Relaxed);
    }

    fn play_speed(&self) -> f32 {
        f32::from_bits(self.state.play_speed_bits.load(Ordering::Relaxed))
    }

    /// Whether two handles refer to the same link
    pub fn same_link(&self, other: &AudioLink) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for AudioLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioLink")
            .field("time", &self.time())
            .field("sample_rate", &self.sample_rate())
            .field("playing", &self.is_playing())
            .finish()
    }
}

/// An external audio device that can drive a sequence's clock.
///
/// On [`connect`](AudioDriver::connect) the driver starts forwarding its
/// callback to the link's hooks; on [`disconnect`](AudioDriver::disconnect)
/// it must stop using that link.
pub trait AudioDriver: Send + Sync {
    /// Start feeding `link` from the device callback
    fn connect(&self, link: AudioLink);

    /// Stop feeding the previously connected link
    fn disconnect(&self);

    /// Human-readable driver name for logs
    fn name(&self) -> &str {
        "audio driver"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_accumulate_only_while_playing() {
        let link = AudioLink::new(2.0, 1.0, false);
        link.on_audio_block(44_100);
        assert!((link.time() - 2.0).abs() < 1e-9);

        link.set_playing(true);
        link.on_audio_block(22_050);
        link.on_audio_block(22_050);
        assert!((link.time() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_rate_and_speed() {
        let link = AudioLink::new(0.0, 2.0, true);
        link.on_audio_block_start(48_000.0);
        link.on_audio_block(24_000);
        // 0.5s of audio at double speed
        assert!((link.time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_sample_rate_is_ignored() {
        let link = AudioLink::new(0.0, 1.0, true);
        link.on_audio_block_start(0.0);
        assert_eq!(link.sample_rate(), DEFAULT_SAMPLE_RATE);
        link.on_audio_stop();
        assert_eq!(link.sample_rate(), DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_rewind_keeps_concurrent_blocks() {
        let link = AudioLink::new(10.25, 1.0, true);
        link.on_audio_block(22_050);
        assert!((link.rewind(10.0) - 0.75).abs() < 1e-9);
        assert!((link.time() - 0.75).abs() < 1e-9);
        assert_eq!(link.rewind(5.0), 0.0);
    }

    #[test]
    fn test_clones_share_state() {
        let link = AudioLink::new(0.0, 1.0, true);
        let other = link.clone();
        other.on_audio_block(44_100);
        assert!(link.same_link(&other));
        assert!((link.time() - 1.0).abs() < 1e-9);
        assert!(!link.same_link(&AudioLink::new(0.0, 1.0, true)));
    }
}
