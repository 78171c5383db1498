// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cue-based timeline sequencing for cuedeck.
//!
//! This crate provides:
//! - An ordered store of named cue markers with navigation queries
//! - A timeline clock driven by wall-clock time or by an audio device
//! - A Play/Stop/Pause transport with cue jumps
//! - Synchronous and coalescing asynchronous change notifications
//! - RON/JSON persistence
//!
//! ## Architecture
//!
//! [`Sequence`] is the entry point: a cloneable handle over shared state.
//! While playing, a background [`ticker`] thread (or the host, in
//! [`TickMode::Manual`]) advances the [`TimelineClock`]. An attached
//! [`AudioDriver`] accumulates time on its own realtime thread through an
//! [`AudioLink`], which the tick then copies into the playhead.

pub mod audio;
pub mod clock;
pub mod cue;
pub mod document;
pub mod error;
pub mod notify;
pub mod playback;
pub mod sequence;
pub mod ticker;

pub use audio::{AudioDriver, AudioLink, DEFAULT_SAMPLE_RATE};
pub use clock::{TickOutcome, TimeSource, TimelineClock, MIN_SEQUENCE_TIME};
pub use cue::{Cue, CueId, CueStore};
pub use document::{SequenceDocument, SEQUENCE_FORMAT_VERSION};
pub use error::{Result, SequenceError};
pub use notify::{
    Coalesce, CoalescingNotifier, ListenerId, NotifierConfig, SequenceEvent, SequenceListener,
    SequenceNotification,
};
pub use playback::{PlaybackController, PlaybackState, Trigger};
pub use sequence::{Sequence, SequenceConfig, TickMode};
