// SPDX-License-Identifier: MIT OR Apache-2.0
//! The sequence handle.
//!
//! [`Sequence`] ties the cue store, the timeline clock, the transport and the
//! notification channels together behind a cheap, cloneable, thread-safe
//! handle. State lives behind one mutex; synchronous listeners run after it
//! is released, on the thread that caused the change, so they may call back
//! into the sequence. Changes and their dispatch are serialized across
//! threads, so listeners see events in the order the changes happened.

use crate::audio::{AudioDriver, AudioLink};
use crate::clock::{
    TickOutcome, TimeSource, TimelineClock, MAX_FPS, MIN_FPS, MIN_PLAY_SPEED, MIN_SEQUENCE_TIME,
};
use crate::cue::{Cue, CueId, CueStore};
use crate::document::SequenceDocument;
use crate::error::Result;
use crate::notify::{
    CoalescingNotifier, ListenerId, ListenerList, NotifierConfig, SequenceEvent, SequenceListener,
    SequenceNotification,
};
use crate::playback::{PlaybackController, PlaybackState, Trigger};
use crate::ticker::Ticker;
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// What drives [`TimelineClock::advance`] while playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TickMode {
    /// A background ticker at `1000 / fps` ms
    #[default]
    Timer,
    /// The host calls [`Sequence::tick`]
    Manual,
}

/// Runtime configuration of a sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Tick source
    pub tick_mode: TickMode,
    /// Async notification queue
    pub notifier: NotifierConfig,
}

impl SequenceConfig {
    /// Host-driven ticking with the default notifier
    pub fn manual() -> Self {
        Self {
            tick_mode: TickMode::Manual,
            ..Default::default()
        }
    }
}

struct SequenceState {
    clock: TimelineClock,
    controller: PlaybackController,
    cues: CueStore,
    name: String,
    start_at_load: bool,
    editing: bool,
    layers: Option<serde_json::Value>,
    driver: Option<Arc<dyn AudioDriver>>,
    ticker: Option<Ticker>,
    /// Bumped for every new ticker; stale ticks are ignored
    generation: u64,
    tick_mode: TickMode,
}

impl SequenceState {
    fn new(tick_mode: TickMode) -> Self {
        Self {
            clock: TimelineClock::new(),
            controller: PlaybackController::new(),
            cues: CueStore::new(),
            name: "Sequence".to_string(),
            start_at_load: false,
            editing: false,
            layers: None,
            driver: None,
            ticker: None,
            generation: 0,
            tick_mode,
        }
    }

    fn fire(&mut self, trigger: Trigger, now: Instant, out: &mut Vec<SequenceEvent>) {
        self.controller
            .fire(trigger, &mut self.clock, &mut self.cues, now, out);
    }

    fn detach_driver(&mut self, now: Instant, out: &mut Vec<SequenceEvent>) {
        if let Some(old) = self.driver.take() {
            old.disconnect();
            self.clock.set_time_source(TimeSource::WallClock, now, out);
            tracing::debug!(driver = old.name(), "Audio driver detached");
        }
    }
}

struct Shared {
    /// Held across a change and its dispatch. Reentrant so listeners may
    /// call back into the sequence.
    dispatch: ReentrantMutex<()>,
    state: Mutex<SequenceState>,
    listeners: ListenerList,
    notifier: CoalescingNotifier<SequenceNotification>,
}

impl Shared {
    /// Mutate state under the lock, then notify with the lock released.
    fn update<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut SequenceState, &mut Vec<SequenceEvent>) -> R,
    ) -> R {
        let _dispatch = self.dispatch.lock();
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let result = f(&mut *state, &mut events);
            self.sync_ticker(&mut *state);
            result
        };

        for event in &events {
            match *event {
                SequenceEvent::PlayStateChanged { playing } => self
                    .notifier
                    .notify(SequenceNotification::PlayStateChanged { playing }),
                SequenceEvent::EditingStateChanged { editing } => self
                    .notifier
                    .notify(SequenceNotification::EditingStateChanged { editing }),
                _ => {}
            }
        }
        self.listeners.dispatch(&events);
        result
    }

    /// Run a ticker exactly while playing in timer mode, at the current period.
    fn sync_ticker(self: &Arc<Self>, state: &mut SequenceState) {
        let wanted = state.tick_mode == TickMode::Timer && state.clock.is_playing();
        if !wanted {
            if state.ticker.take().is_some() {
                tracing::debug!("Ticker stopped");
            }
            return;
        }

        let period = state.clock.tick_period();
        if state.ticker.as_ref().is_some_and(|t| t.period() == period) {
            return;
        }

        state.ticker = None;
        state.generation += 1;
        let generation = state.generation;
        let weak: Weak<Shared> = Arc::downgrade(self);
        let spawned = Ticker::spawn(period, move || {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            matches!(
                shared.tick(Instant::now(), Some(generation)),
                TickOutcome::Advanced | TickOutcome::Looped
            )
        });
        match spawned {
            Ok(ticker) => state.ticker = Some(ticker),
            Err(err) => tracing::error!(%err, "Failed to start sequence ticker"),
        }
    }

    fn tick(self: &Arc<Self>, now: Instant, generation: Option<u64>) -> TickOutcome {
        self.update(|state, out| {
            if generation.is_some_and(|g| g != state.generation) {
                return TickOutcome::Idle;
            }
            let outcome = state.clock.advance(now, out);
            if outcome == TickOutcome::Finished {
                state.controller.finish(&mut state.clock, now, out);
            }
            outcome
        })
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.ticker = None;
        if let Some(driver) = state.driver.take() {
            driver.disconnect();
        }
    }
}

/// A cue-annotated timeline with transport control.
///
/// Cloning yields another handle to the same sequence.
#[derive(Clone)]
pub struct Sequence {
    shared: Arc<Shared>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Sequence")
            .field("name", &state.name)
            .field("state", &state.controller.state())
            .field("current_time", &state.clock.current_time())
            .field("total_time", &state.clock.total_time())
            .field("cues", &state.cues.len())
            .finish()
    }
}

impl Sequence {
    /// Create an empty sequence ticked by a background timer
    pub fn new() -> Self {
        Self::with_config(SequenceConfig::default())
    }

    /// Create an empty sequence
    pub fn with_config(config: SequenceConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatch: ReentrantMutex::new(()),
                state: Mutex::new(SequenceState::new(config.tick_mode)),
                listeners: ListenerList::new(),
                notifier: CoalescingNotifier::new(config.notifier),
            }),
        }
    }


    /// Fire a transport trigger
    pub fn trigger(&self, trigger: Trigger) {
        self.shared
            .update(|state, out| state.fire(trigger, Instant::now(), out));
    }

    /// Start playing, rewinding first if at the end
    pub fn play(&self) {
        self.trigger(Trigger::Play);
    }

    /// Stop and rewind to 0
    pub fn stop(&self) {
        self.trigger(Trigger::Stop);
    }

    /// Stop, keeping the playhead
    pub fn pause(&self) {
        self.trigger(Trigger::Pause);
    }

    /// Pause if playing, otherwise play
    pub fn toggle_play(&self) {
        self.trigger(Trigger::TogglePlay);
    }

    /// Jump to the previous enabled cue, skipping one passed less than a second ago
    pub fn prev_cue(&self) {
        self.trigger(Trigger::PrevCue);
    }

    /// Jump to the next enabled cue
    pub fn next_cue(&self) {
        self.trigger(Trigger::NextCue);
    }

    /// Advance one tick now. Only needed with [`TickMode::Manual`].
    pub fn tick(&self) -> TickOutcome {
        self.tick_at(Instant::now())
    }

    /// Advance one tick as if it were `now`
    pub fn tick_at(&self, now: Instant) -> TickOutcome {
        self.shared.tick(now, None)
    }

    /// Transport state
    pub fn playback_state(&self) -> PlaybackState {
        self.shared.state.lock().controller.state()
    }

    /// Whether the clock is running
    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().clock.is_playing()
    }


    /// Current playhead position in seconds
    pub fn current_time(&self) -> f32 {
        self.shared.state.lock().clock.current_time()
    }

    /// Move the playhead. See [`TimelineClock::set_current_time`].
    pub fn set_current_time(&self, time: f32, force_over_playing: bool, seek_mode: bool) {
        self.shared.update(|state, out| {
            state
                .clock
                .set_current_time(time, force_over_playing, seek_mode, out);
        });
    }

    /// User jump to `time`, even while playing
    pub fn seek(&self, time: f32) {
        self.set_current_time(time, true, true);
    }

    /// Timeline length in seconds
    pub fn total_time(&self) -> f32 {
        self.shared.state.lock().clock.total_time()
    }

    /// Set timeline length, floored at one second
    pub fn set_total_time(&self, total_time: f32) {
        self.shared
            .update(|state, out| state.clock.set_total_time(total_time, out));
    }

    /// Play speed factor
    pub fn play_speed(&self) -> f32 {
        self.shared.state.lock().clock.play_speed()
    }

    /// Set play speed
    pub fn set_play_speed(&self, speed: f32) {
        self.shared
            .update(|state, out| state.clock.set_play_speed(speed, out));
    }

    /// Whether playback wraps at the end
    pub fn looping(&self) -> bool {
        self.shared.state.lock().clock.looping()
    }

    /// Enable or disable looping
    pub fn set_looping(&self, looping: bool) {
        self.shared.state.lock().clock.set_looping(looping);
    }

    /// Evaluation rate
    pub fn fps(&self) -> u32 {
        self.shared.state.lock().clock.fps()
    }

    /// Set evaluation rate. A running ticker restarts at the new period.
    pub fn set_fps(&self, fps: u32) {
        self.shared.update(|state, _| {
            if state.clock.set_fps(fps) {
                tracing::debug!(fps = state.clock.fps(), "Evaluation rate changed");
            }
        });
    }

    /// Interval between ticks
    pub fn tick_period(&self) -> Duration {
        self.shared.state.lock().clock.tick_period()
    }

    /// Visible sub-range of the timeline
    pub fn view_range(&self) -> (f32, f32) {
        self.shared.state.lock().clock.view_range()
    }

    /// Set the visible range; clamped to the timeline and the minimum span
    pub fn set_view_range(&self, start: f32, end: f32) {
        self.shared.state.lock().clock.set_view_range(start, end);
    }

    /// Move the start of the visible range
    pub fn set_view_start(&self, start: f32) {
        self.shared.state.lock().clock.set_view_start(start);
    }


    /// Add a cue at `time`, named after its position in the store
    pub fn add_cue(&self, time: f32) -> CueId {
        self.shared.state.lock().cues.add(time)
    }

    /// Add a fully specified cue
    pub fn insert_cue(&self, cue: Cue) -> CueId {
        self.shared.state.lock().cues.insert(cue)
    }

    /// Remove a cue
    pub fn remove_cue(&self, id: CueId) -> Option<Cue> {
        self.shared.state.lock().cues.remove(id)
    }

    /// Move a cue
    pub fn set_cue_time(&self, id: CueId, time: f32) -> bool {
        self.shared.state.lock().cues.set_time(id, time)
    }

    /// Enable or disable a cue
    pub fn set_cue_enabled(&self, id: CueId, enabled: bool) -> bool {
        self.shared.state.lock().cues.set_enabled(id, enabled)
    }

    /// Rename a cue
    pub fn set_cue_name(&self, id: CueId, name: impl Into<String>) -> bool {
        self.shared.state.lock().cues.set_name(id, name)
    }

    /// Sort the cue store now
    pub fn reorder_cues(&self) {
        self.shared.state.lock().cues.reorder();
    }

    /// Get a cue by ID
    pub fn cue(&self, id: CueId) -> Option<Cue> {
        self.shared.state.lock().cues.get(id).cloned()
    }

    /// Number of cues
    pub fn cue_count(&self) -> usize {
        self.shared.state.lock().cues.len()
    }

    /// All cues in time order
    pub fn cues(&self) -> Vec<(CueId, Cue)> {
        let mut state = self.shared.state.lock();
        state.cues.reorder_if_dirty();
        state
            .cues
            .iter()
            .map(|(id, cue)| (id, cue.clone()))
            .collect()
    }

    /// Cue times, ascending. `min_time` only applies when `max_time > 0`.
    pub fn all_cue_times(&self, min_time: f32, max_time: f32, include_disabled: bool) -> Vec<f32> {
        let mut state = self.shared.state.lock();
        state.cues.reorder_if_dirty();
        state.cues.all_times(min_time, max_time, include_disabled)
    }

    /// Time of the cue closest to `time`
    pub fn nearest_cue(&self, time: f32, include_disabled: bool) -> f32 {
        let mut state = self.shared.state.lock();
        state.cues.reorder_if_dirty();
        state.cues.nearest(time, include_disabled)
    }

    /// Time of the first cue after `time`
    pub fn next_cue_time(&self, time: f32, include_disabled: bool) -> f32 {
        let mut state = self.shared.state.lock();
        state.cues.reorder_if_dirty();
        state.cues.next(time, include_disabled)
    }

    /// Time of the last cue at or before `time - threshold`
    pub fn prev_cue_time(&self, time: f32, threshold: f32, include_disabled: bool) -> f32 {
        let mut state = self.shared.state.lock();
        state.cues.reorder_if_dirty();
        state.cues.previous(time, threshold, include_disabled)
    }

    /// Cues with `start < time <= end`
    pub fn cues_in_timespan(&self, start: f32, end: f32, include_disabled: bool) -> Vec<(CueId, Cue)> {
        let mut state = self.shared.state.lock();
        state.cues.reorder_if_dirty();
        state
            .cues
            .in_timespan(start, end, include_disabled)
            .into_iter()
            .map(|(id, cue)| (id, cue.clone()))
            .collect()
    }


    /// Attach or detach an audio driver.
    ///
    /// The previous driver is disconnected and the new one receives a fresh
    /// [`AudioLink`] seeded with the current playhead. Drivers are connected
    /// under the sequence lock and must not call back into the sequence.
    pub fn set_audio_source(&self, driver: Option<Arc<dyn AudioDriver>>) {
        self.shared.update(|state, out| {
            let same = match (&state.driver, &driver) {
                (Some(current), Some(new)) => Arc::ptr_eq(current, new),
                (None, None) => true,
                _ => false,
            };
            if same {
                return;
            }

            let now = Instant::now();
            state.detach_driver(now, out);
            if let Some(driver) = driver {
                let clock = &mut state.clock;
                let link = AudioLink::new(
                    f64::from(clock.current_time()),
                    clock.play_speed(),
                    clock.is_playing(),
                );
                clock.set_time_source(TimeSource::AudioDriven(link.clone()), now, out);
                driver.connect(link);
                tracing::debug!(
                    driver = driver.name(),
                    time = clock.current_time(),
                    "Audio driver attached"
                );
                state.driver = Some(driver);
            }
        });
    }

    /// Whether an audio driver drives time
    pub fn is_audio_driven(&self) -> bool {
        self.shared.state.lock().clock.is_audio_driven()
    }

    /// The link handed to the attached driver
    pub fn audio_link(&self) -> Option<AudioLink> {
        self.shared
            .state
            .lock()
            .clock
            .time_source()
            .link()
            .cloned()
    }


    /// Register a synchronous listener
    pub fn add_listener(&self, listener: Arc<dyn SequenceListener>) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    /// Unregister a synchronous listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Register an async listener receiving every notification in order
    pub fn add_async_listener(
        &self,
        callback: impl Fn(&SequenceNotification) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.notifier.add_listener(callback)
    }

    /// Register an async listener receiving the last notification of each kind per cycle
    pub fn add_async_coalesced_listener(
        &self,
        callback: impl Fn(&SequenceNotification) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.notifier.add_coalesced_listener(callback)
    }

    /// Unregister an async listener
    pub fn remove_async_listener(&self, id: ListenerId) -> bool {
        self.shared.notifier.remove_listener(id)
    }


    /// Display name
    pub fn name(&self) -> String {
        self.shared.state.lock().name.clone()
    }

    /// Rename the sequence
    pub fn set_name(&self, name: impl Into<String>) {
        self.shared.state.lock().name = name.into();
    }

    /// Whether loading completes with Play
    pub fn start_at_load(&self) -> bool {
        self.shared.state.lock().start_at_load
    }

    /// Set whether loading completes with Play
    pub fn set_start_at_load(&self, start_at_load: bool) {
        self.shared.state.lock().start_at_load = start_at_load;
    }

    /// Whether the sequence is open in an editor
    pub fn is_being_edited(&self) -> bool {
        self.shared.state.lock().editing
    }

    /// Set the editing flag and notify both channels
    pub fn set_being_edited(&self, editing: bool) {
        self.shared.update(|state, out| {
            if state.editing != editing {
                state.editing = editing;
                out.push(SequenceEvent::EditingStateChanged { editing });
            }
        });
    }

    /// Layer data carried through persistence
    pub fn layers(&self) -> Option<serde_json::Value> {
        self.shared.state.lock().layers.clone()
    }

    /// Replace the layer data
    pub fn set_layers(&self, layers: Option<serde_json::Value>) {
        self.shared.state.lock().layers = layers;
    }


    /// Snapshot the persisted state
    pub fn to_document(&self) -> SequenceDocument {
        let mut state = self.shared.state.lock();
        state.cues.reorder_if_dirty();
        SequenceDocument {
            name: state.name.clone(),
            total_time: state.clock.total_time(),
            looping: state.clock.looping(),
            play_speed: state.clock.play_speed(),
            fps: state.clock.fps(),
            start_at_load: state.start_at_load,
            cues: state.cues.iter().map(|(_, cue)| cue.clone()).collect(),
            layers: state.layers.clone(),
            editing: state.editing,
            ..Default::default()
        }
    }

    /// Restore state from a document.
    ///
    /// Playback is stopped and never restarted here; call
    /// [`end_load`](Self::end_load) once loading is complete.
    pub fn load_document(&self, document: SequenceDocument) {
        let SequenceDocument {
            name,
            total_time,
            looping,
            play_speed,
            fps,
            start_at_load,
            cues,
            layers,
            editing,
            ..
        } = document;

        if !total_time.is_finite() || total_time < MIN_SEQUENCE_TIME {
            tracing::warn!(total_time, "Sequence length out of range, clamping");
        }
        if !play_speed.is_finite() || play_speed < MIN_PLAY_SPEED {
            tracing::warn!(play_speed, "Play speed out of range, clamping");
        }
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            tracing::warn!(fps, "Frame rate out of range, clamping");
        }

        let cue_count = cues.len();
        self.shared.update(|state, out| {
            state.fire(Trigger::Stop, Instant::now(), out);
            state.name = name;
            state.clock.set_total_time(total_time, out);
            state.clock.set_looping(looping);
            state.clock.set_play_speed(play_speed, out);
            state.clock.set_fps(fps);
            let total = state.clock.total_time();
            state.clock.set_view_range(0.0, total);
            state.start_at_load = start_at_load;
            state.layers = layers;

            state.cues.clear();
            for cue in cues {
                state.cues.insert(cue);
            }
            state.cues.reorder();

            if state.editing != editing {
                state.editing = editing;
                out.push(SequenceEvent::EditingStateChanged { editing });
            }
            tracing::info!(name = %state.name, cues = cue_count, "Sequence loaded");
        });
    }

    /// Load-complete hook: plays if the sequence starts at load
    pub fn end_load(&self) {
        self.shared.update(|state, out| {
            if state.start_at_load {
                state.fire(Trigger::Play, Instant::now(), out);
            }
        });
    }

    /// Write the sequence to `path` as RON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_document().to_ron()?;
        std::fs::write(path, content)?;
        tracing::info!(path = %path.display(), "Sequence saved");
        Ok(())
    }

    /// Read a sequence from a RON file
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_config(path, SequenceConfig::default())
    }

    /// Read a sequence from a RON file with a custom configuration
    pub fn load_with_config(path: &Path, config: SequenceConfig) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let document = SequenceDocument::from_ron(&content)?;
        let sequence = Self::with_config(config);
        sequence.load_document(document);
        Ok(sequence)
    }

    /// Tear down: detach the audio driver and stop
    pub fn clear(&self) {
        self.shared.update(|state, out| {
            let now = Instant::now();
            state.detach_driver(now, out);
            state.fire(Trigger::Stop, now, out);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<SequenceEvent>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<SequenceEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl SequenceListener for Recorder {
        fn play_state_changed(&self, playing: bool) {
            self.events
                .lock()
                .push(SequenceEvent::PlayStateChanged { playing });
        }

        fn current_time_changed(&self, prev_time: f32, time: f32, playing: bool) {
            self.events.lock().push(SequenceEvent::CurrentTimeChanged {
                prev_time,
                time,
                playing,
            });
        }

        fn looped(&self) {
            self.events.lock().push(SequenceEvent::Looped);
        }

        fn audio_source_changed(&self, audio_driven: bool) {
            self.events
                .lock()
                .push(SequenceEvent::AudioSourceChanged { audio_driven });
        }

        fn editing_state_changed(&self, editing: bool) {
            self.events
                .lock()
                .push(SequenceEvent::EditingStateChanged { editing });
        }
    }

    #[derive(Default)]
    struct TestDriver {
        link: Mutex<Option<AudioLink>>,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl TestDriver {
        fn link(&self) -> AudioLink {
            self.link.lock().clone().unwrap()
        }
    }

    impl AudioDriver for TestDriver {
        fn connect(&self, link: AudioLink) {
            *self.link.lock() = Some(link);
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        fn disconnect(&self) {
            self.link.lock().take();
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manual() -> Sequence {
        Sequence::with_config(SequenceConfig::manual())
    }

    #[test]
    fn test_manual_ticks_advance_and_notify() {
        let sequence = manual();
        let recorder = Arc::new(Recorder::default());
        sequence.add_listener(recorder.clone());

        sequence.play();
        let t0 = Instant::now();
        assert_eq!(sequence.tick_at(t0 + Duration::from_millis(500)), TickOutcome::Advanced);
        assert!((sequence.current_time() - 0.5).abs() < 0.01);

        let events = recorder.take();
        assert_eq!(events[0], SequenceEvent::PlayStateChanged { playing: true });
        assert!(matches!(
            events[1],
            SequenceEvent::CurrentTimeChanged { prev_time, playing: true, .. } if prev_time == 0.0
        ));
    }

    #[test]
    fn test_natural_end_pauses_at_end() {
        let sequence = manual();
        sequence.set_total_time(2.0);
        sequence.seek(1.8);
        sequence.play();
        let t0 = Instant::now();

        assert_eq!(sequence.tick_at(t0 + Duration::from_millis(400)), TickOutcome::Finished);
        assert_eq!(sequence.playback_state(), PlaybackState::Paused);
        assert!(!sequence.is_playing());
        assert_eq!(sequence.current_time(), 2.0);

        // Play at the end rewinds
        sequence.play();
        assert_eq!(sequence.current_time(), 0.0);
        assert!(sequence.is_playing());
    }

    #[test]
    fn test_loop_carries_overshoot() {
        let sequence = manual();
        let recorder = Arc::new(Recorder::default());
        sequence.add_listener(recorder.clone());
        sequence.set_total_time(10.0);
        sequence.set_looping(true);
        sequence.seek(9.8);
        sequence.play();
        let t0 = Instant::now();

        assert_eq!(sequence.tick_at(t0 + Duration::from_millis(500)), TickOutcome::Looped);
        assert!((sequence.current_time() - 0.3).abs() < 0.01);
        assert!(sequence.is_playing());
        assert!(recorder.take().contains(&SequenceEvent::Looped));
    }

    #[test]
    fn test_attach_resyncs_audio_time() {
        let sequence = manual();
        sequence.seek(7.5);
        let driver = Arc::new(TestDriver::default());
        let as_dyn: Arc<dyn AudioDriver> = driver.clone();

        sequence.set_audio_source(Some(as_dyn.clone()));
        assert!(sequence.is_audio_driven());
        let link = driver.link();
        assert!((link.time() - 7.5).abs() < 1e-6);
        assert!(sequence.audio_link().unwrap().same_link(&link));

        sequence.play();
        sequence.tick();
        assert_eq!(sequence.current_time(), 7.5);

        link.on_audio_block_start(48_000.0);
        link.on_audio_block(48_000);
        sequence.tick();
        assert!((sequence.current_time() - 8.5).abs() < 1e-4);

        // Re-attaching the same driver is a no-op
        sequence.set_audio_source(Some(as_dyn));
        assert_eq!(driver.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_mid_playback_continues_from_audio_time() {
        let sequence = manual();
        let recorder = Arc::new(Recorder::default());
        sequence.add_listener(recorder.clone());
        let driver = Arc::new(TestDriver::default());
        sequence.set_audio_source(Some(driver.clone()));
        sequence.play();

        let link = driver.link();
        link.on_audio_block(44_100 * 3);
        sequence.tick();
        assert!((sequence.current_time() - 3.0).abs() < 1e-4);

        sequence.set_audio_source(None);
        assert!(!sequence.is_audio_driven());
        assert_eq!(driver.disconnects.load(Ordering::SeqCst), 1);
        assert!(!link.is_playing());

        let t0 = Instant::now();
        sequence.tick_at(t0 + Duration::from_millis(100));
        assert!((sequence.current_time() - 3.1).abs() < 0.01);

        let sources: Vec<_> = recorder
            .take()
            .into_iter()
            .filter(|e| matches!(e, SequenceEvent::AudioSourceChanged { .. }))
            .collect();
        assert_eq!(
            sources,
            vec![
                SequenceEvent::AudioSourceChanged { audio_driven: true },
                SequenceEvent::AudioSourceChanged { audio_driven: false },
            ]
        );
    }

    #[test]
    fn test_cue_queries_and_triggers() {
        let sequence = manual();
        for t in [9.0, 1.0, 5.0] {
            sequence.add_cue(t);
        }
        assert_eq!(sequence.all_cue_times(3.0, 0.0, false), vec![1.0, 5.0, 9.0]);
        assert_eq!(sequence.all_cue_times(3.0, 6.0, false), vec![5.0]);
        assert_eq!(sequence.nearest_cue(4.0, false), 5.0);
        let span: Vec<f32> = sequence
            .cues_in_timespan(1.0, 5.0, false)
            .into_iter()
            .map(|(_, cue)| cue.time)
            .collect();
        assert_eq!(span, vec![5.0]);

        sequence.seek(5.4);
        sequence.prev_cue();
        assert_eq!(sequence.current_time(), 1.0);
        sequence.next_cue();
        assert_eq!(sequence.current_time(), 5.0);
        assert_eq!(sequence.prev_cue_time(5.4, 0.0, false), 5.0);
        assert_eq!(sequence.next_cue_time(9.0, false), 9.0);
    }

    #[test]
    fn test_listener_may_call_back_into_sequence() {
        struct Reentrant {
            sequence: Sequence,
            seen: mpsc::Sender<f32>,
        }

        impl SequenceListener for Reentrant {
            fn current_time_changed(&self, _prev: f32, _time: f32, _playing: bool) {
                let _ = self.seen.send(self.sequence.current_time());
            }
        }

        let sequence = manual();
        let (tx, rx) = mpsc::channel();
        let id = sequence.add_listener(Arc::new(Reentrant {
            sequence: sequence.clone(),
            seen: tx,
        }));
        sequence.seek(4.0);
        assert_eq!(rx.try_recv().unwrap(), 4.0);
        assert!(sequence.remove_listener(id));
    }

    #[test]
    fn test_load_document_does_not_play_until_end_load() {
        let sequence = manual();
        let document = SequenceDocument {
            name: "Show".to_string(),
            total_time: 0.0,
            fps: 0,
            start_at_load: true,
            cues: vec![Cue::new(3.0, "B"), Cue::new(1.0, "A")],
            ..Default::default()
        };
        sequence.load_document(document);
        assert!(!sequence.is_playing());
        assert_eq!(sequence.name(), "Show");
        assert_eq!(sequence.total_time(), MIN_SEQUENCE_TIME);
        assert_eq!(sequence.fps(), MIN_FPS);
        let names: Vec<String> = sequence.cues().into_iter().map(|(_, c)| c.name).collect();
        assert_eq!(names, vec!["A", "B"]);

        sequence.end_load();
        assert!(sequence.is_playing());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.ron");

        let sequence = manual();
        sequence.set_name("Show");
        sequence.set_total_time(45.0);
        sequence.set_play_speed(0.5);
        sequence.set_looping(true);
        sequence.set_fps(25);
        let cue = sequence.add_cue(12.0);
        sequence.set_cue_name(cue, "Chorus");
        sequence.set_layers(Some(serde_json::json!({ "tracks": 2 })));
        sequence.seek(20.0);
        sequence.save(&path).unwrap();

        let loaded = Sequence::load_with_config(&path, SequenceConfig::manual()).unwrap();
        assert_eq!(loaded.name(), "Show");
        assert_eq!(loaded.total_time(), 45.0);
        assert_eq!(loaded.play_speed(), 0.5);
        assert!(loaded.looping());
        assert_eq!(loaded.fps(), 25);
        assert_eq!(loaded.current_time(), 0.0);
        assert_eq!(loaded.layers(), sequence.layers());
        let cues = loaded.cues();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].1.name, "Chorus");
        assert_eq!(loaded.to_document(), sequence.to_document());
    }

    #[test]
    fn test_editing_notifies_sync_and_async() {
        let sequence = manual();
        let recorder = Arc::new(Recorder::default());
        sequence.add_listener(recorder.clone());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        sequence.add_async_coalesced_listener(move |n| {
            let _ = tx.lock().send(n.clone());
        });

        sequence.set_being_edited(true);
        sequence.set_being_edited(true);
        assert!(sequence.is_being_edited());
        assert_eq!(
            recorder.take(),
            vec![SequenceEvent::EditingStateChanged { editing: true }]
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            SequenceNotification::EditingStateChanged { editing: true }
        );
    }

    #[test]
    fn test_timer_mode_ticks_in_background() {
        let sequence = Sequence::new();
        sequence.set_fps(100);
        sequence.play();
        std::thread::sleep(Duration::from_millis(200));
        assert!(sequence.current_time() > 0.05);

        // Rate change restarts the ticker without stopping playback
        sequence.set_fps(20);
        assert!(sequence.is_playing());
        assert_eq!(
            sequence.shared.state.lock().ticker.as_ref().map(Ticker::period),
            Some(Duration::from_millis(50))
        );

        sequence.stop();
        assert!(sequence.shared.state.lock().ticker.is_none());
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sequence.current_time(), 0.0);
    }

    #[test]
    fn test_stop_rewinds_pending_cue_jump() {
        let sequence = manual();
        let driver = Arc::new(TestDriver::default());
        sequence.set_audio_source(Some(driver.clone()));
        sequence.add_cue(8.0);

        sequence.play();
        sequence.next_cue();
        sequence.stop();
        assert_eq!(sequence.current_time(), 0.0);
        assert_eq!(driver.link().time(), 0.0);

        sequence.play();
        sequence.tick();
        assert_eq!(sequence.current_time(), 0.0);
    }

    #[test]
    fn test_audio_loop_keeps_blocks_rendered_after_read() {
        let sequence = manual();
        let driver = Arc::new(TestDriver::default());
        sequence.set_audio_source(Some(driver.clone()));
        sequence.set_total_time(10.0);
        sequence.set_looping(true);
        sequence.seek(9.5);
        sequence.play();

        let link = driver.link();
        link.on_audio_block(44_100);
        assert_eq!(sequence.tick(), TickOutcome::Looped);
        assert!((sequence.current_time() - 0.5).abs() < 1e-4);
        assert!((link.time() - 0.5).abs() < 1e-6);
    }

    /// Records events, stalling on the first playing time update
    struct SlowRecorder {
        events: Mutex<Vec<SequenceEvent>>,
        started: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl SequenceListener for SlowRecorder {
        fn play_state_changed(&self, playing: bool) {
            self.events
                .lock()
                .push(SequenceEvent::PlayStateChanged { playing });
        }

        fn current_time_changed(&self, prev_time: f32, time: f32, playing: bool) {
            if let Some(started) = self.started.lock().take() {
                let _ = started.send(());
                std::thread::sleep(Duration::from_millis(100));
            }
            self.events.lock().push(SequenceEvent::CurrentTimeChanged {
                prev_time,
                time,
                playing,
            });
        }
    }

    #[test]
    fn test_ticker_events_are_not_delivered_after_stop() {
        let sequence = Sequence::new();
        sequence.set_fps(100);
        let (tx, rx) = mpsc::channel();
        let recorder = Arc::new(SlowRecorder {
            events: Mutex::new(Vec::new()),
            started: Mutex::new(Some(tx)),
        });
        sequence.add_listener(recorder.clone());

        sequence.play();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        sequence.stop();

        let events = recorder.events.lock().clone();
        let stopped = events
            .iter()
            .position(|e| *e == SequenceEvent::PlayStateChanged { playing: false })
            .unwrap();
        assert!(events[stopped..]
            .iter()
            .all(|e| !matches!(e, SequenceEvent::CurrentTimeChanged { playing: true, .. })));
    }

    #[test]
    fn test_clear_detaches_and_stops() {
        let sequence = manual();
        let driver = Arc::new(TestDriver::default());
        sequence.set_audio_source(Some(driver.clone()));
        sequence.seek(3.0);
        sequence.play();

        sequence.clear();
        assert!(!sequence.is_audio_driven());
        assert_eq!(driver.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(sequence.playback_state(), PlaybackState::Stopped);
        assert_eq!(sequence.current_time(), 0.0);
    }
}
