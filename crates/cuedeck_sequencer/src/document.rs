// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted form of a sequence.
//!
//! Every field has a default, so documents with missing fields still load.
//! The live playhead and play state are never part of the document.

use crate::clock::{DEFAULT_FPS, DEFAULT_TOTAL_TIME};
use crate::cue::Cue;
use crate::error::{Result, SequenceError};
use serde::{Deserialize, Serialize};

/// Current sequence file format version
pub const SEQUENCE_FORMAT_VERSION: u32 = 1;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Serializable snapshot of a sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceDocument {
    /// File format version
    pub version: u32,
    /// Display name
    pub name: String,
    /// Timeline length in seconds
    pub total_time: f32,
    /// Whether playback wraps at the end
    pub looping: bool,
    /// Play speed factor
    pub play_speed: f32,
    /// Evaluation rate
    pub fps: u32,
    /// Start playing once loading completes
    pub start_at_load: bool,
    /// Cue markers in timeline order
    pub cues: Vec<Cue>,
    /// Layer data, carried through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers: Option<serde_json::Value>,
    /// Editing flag, only written when set
    #[serde(skip_serializing_if = "is_false")]
    pub editing: bool,
}

impl Default for SequenceDocument {
    fn default() -> Self {
        Self {
            version: SEQUENCE_FORMAT_VERSION,
            name: "Sequence".to_string(),
            total_time: DEFAULT_TOTAL_TIME,
            looping: false,
            play_speed: 1.0,
            fps: DEFAULT_FPS,
            start_at_load: false,
            cues: Vec::new(),
            layers: None,
            editing: false,
        }
    }
}

impl SequenceDocument {
    /// Encode as pretty RON
    pub fn to_ron(&self) -> Result<String> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Decode from RON
    pub fn from_ron(source: &str) -> Result<Self> {
        let document: Self = ron::from_str(source)?;
        document.check_version()
    }

    /// Encode as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON
    pub fn from_json(source: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(source)?;
        document.check_version()
    }

    fn check_version(self) -> Result<Self> {
        if self.version > SEQUENCE_FORMAT_VERSION {
            return Err(SequenceError::UnsupportedVersion {
                found: self.version,
                supported: SEQUENCE_FORMAT_VERSION,
            });
        }
        Ok(self)
    }
}
