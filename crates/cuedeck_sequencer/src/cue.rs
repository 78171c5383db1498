// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cue markers and the ordered cue store.
//!
//! The store keeps cues in ascending time order, but only re-sorts when asked:
//! edits mark the store dirty and a single [`CueStore::reorder`] (or
//! [`CueStore::reorder_if_dirty`]) puts it back in order. All lookups assume a
//! sorted store and never fail. With no cues they return the query time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a cue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CueId(pub Uuid);

impl CueId {
    /// Create a new random cue ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CueId {
    fn default() -> Self {
        Self::new()
    }
}

fn default_enabled() -> bool {
    true
}

/// A named point in time used for navigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    /// Time in seconds
    #[serde(default)]
    pub time: f32,
    /// Disabled cues are skipped by lookups unless explicitly included
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Display name
    #[serde(default)]
    pub name: String,
}

impl Cue {
    /// Create an enabled cue at `time`
    pub fn new(time: f32, name: impl Into<String>) -> Self {
        Self {
            time,
            enabled: true,
            name: name.into(),
        }
    }

    fn visible(&self, include_disabled: bool) -> bool {
        self.enabled || include_disabled
    }
}

/// Ordered collection of cues
#[derive(Debug, Clone, Default)]
pub struct CueStore {
    cues: IndexMap<CueId, Cue>,
    dirty: bool,
}

impl CueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an enabled cue at `time`. Times need not be unique.
    pub fn add(&mut self, time: f32) -> CueId {
        let name = format!("Cue {}", self.cues.len() + 1);
        self.insert(Cue::new(time, name))
    }

    /// Add a fully specified cue
    pub fn insert(&mut self, cue: Cue) -> CueId {
        let id = CueId::new();
        self.cues.insert(id, cue);
        self.dirty = true;
        id
    }

    /// Remove a cue
    pub fn remove(&mut self, id: CueId) -> Option<Cue> {
        // shift_remove keeps the remaining cues in order
        let removed = self.cues.shift_remove(&id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Move a cue. The store is not re-sorted until [`Self::reorder`].
    pub fn set_time(&mut self, id: CueId, time: f32) -> bool {
        match self.cues.get_mut(&id) {
            Some(cue) => {
                cue.time = time;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Enable or disable a cue
    pub fn set_enabled(&mut self, id: CueId, enabled: bool) -> bool {
        match self.cues.get_mut(&id) {
            Some(cue) => {
                cue.enabled = enabled;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Rename a cue
    pub fn set_name(&mut self, id: CueId, name: impl Into<String>) -> bool {
        match self.cues.get_mut(&id) {
            Some(cue) => {
                cue.name = name.into();
                true
            }
            None => false,
        }
    }

    /// Sort by ascending time, keeping insertion order on ties
    pub fn reorder(&mut self) {
        self.cues.sort_by(|_, a, _, b| a.time.total_cmp(&b.time));
        self.dirty = false;
    }

    /// Sort only if an edit happened since the last sort. Returns whether it sorted.
    pub fn reorder_if_dirty(&mut self) -> bool {
        if self.dirty {
            self.reorder();
            true
        } else {
            false
        }
    }

    /// Whether an edit happened since the last sort
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Remove every cue
    pub fn clear(&mut self) {
        self.cues.clear();
        self.dirty = false;
    }

    /// Get a cue
    pub fn get(&self, id: CueId) -> Option<&Cue> {
        self.cues.get(&id)
    }

    /// Number of cues
    pub fn len(&self) -> usize {
        self.cues.len()
    }

    /// Whether the store holds no cues
    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Iterate cues in store order
    pub fn iter(&self) -> impl Iterator<Item = (CueId, &Cue)> {
        self.cues.iter().map(|(id, cue)| (*id, cue))
    }

    /// Times of all visible cues within `[min_time, max_time]`.
    ///
    /// The range only applies when `max_time > 0`; `max_time == 0` returns
    /// every visible cue regardless of `min_time`.
    pub fn all_times(&self, min_time: f32, max_time: f32, include_disabled: bool) -> Vec<f32> {
        self.cues
            .values()
            .filter(|cue| cue.visible(include_disabled))
            .map(|cue| cue.time)
            .filter(|&t| max_time <= 0.0 || (t >= min_time && t <= max_time))
            .collect()
    }

    /// Visible cues with `start < time <= end`
    pub fn in_timespan(&self, start: f32, end: f32, include_disabled: bool) -> Vec<(CueId, &Cue)> {
        self.iter()
            .filter(|(_, cue)| cue.visible(include_disabled))
            .filter(|(_, cue)| cue.time > start && cue.time <= end)
            .collect()
    }

    /// Time of the cue closest to `time`, or `time` itself when empty.
    ///
    /// The first cue is the baseline. The ascending scan stops at the first
    /// cue that is no closer than the best so far, so ties go to the earlier
    /// cue. Skipped disabled cues do not end the scan.
    pub fn nearest(&self, time: f32, include_disabled: bool) -> f32 {
        let mut cues = self.cues.values();
        let Some(first) = cues.next() else {
            return time;
        };

        let mut result = first.time;
        let mut best = (time - first.time).abs();
        for cue in cues {
            if !cue.visible(include_disabled) {
                continue;
            }
            let diff = (time - cue.time).abs();
            if diff >= best {
                break;
            }
            best = diff;
            result = cue.time;
        }
        result
    }

    /// Smallest visible cue time strictly after `time`, or `time` when none
    pub fn next(&self, time: f32, include_disabled: bool) -> f32 {
        let mut result = time;
        for cue in self.cues.values().rev() {
            if !cue.visible(include_disabled) {
                continue;
            }
            if cue.time <= time {
                break;
            }
            result = cue.time;
        }
        result
    }

    /// Largest visible cue time at or before `time - threshold`, or `time` when none.
    ///
    /// The threshold lets repeated "previous" jumps skip a cue the playhead
    /// has only just passed.
    pub fn previous(&self, time: f32, threshold: f32, include_disabled: bool) -> f32 {
        let mut result = time;
        for cue in self.cues.values() {
            if !cue.visible(include_disabled) {
                continue;
            }
            if cue.time > time - threshold {
                break;
            }
            result = cue.time;
        }
        result
    }
}
