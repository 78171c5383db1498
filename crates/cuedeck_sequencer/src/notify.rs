// SPDX-License-Identifier: MIT OR Apache-2.0
//! Change notifications for sequences.
//!
//! Two channels exist:
//! - [`SequenceListener`]: synchronous fan-out on the thread that caused the
//!   change. Listeners must be quick and must not block.
//! - [`CoalescingNotifier`]: a bounded queue drained by a worker thread once per
//!   cycle. Plain async listeners see every queued notification in order;
//!   coalesced listeners see only the latest notification of each kind.

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned when registering a listener, used to remove it later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A state change emitted by a sequence
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceEvent {
    /// Playback started or stopped
    PlayStateChanged {
        /// New play state
        playing: bool,
    },
    /// The playhead moved
    CurrentTimeChanged {
        /// Time reported by the previous notification
        prev_time: f32,
        /// New current time
        time: f32,
        /// Whether the move came from playback, so skipped data should be evaluated
        playing: bool,
    },
    /// Playback wrapped from the end back to the start
    Looped,
    /// Play speed changed
    PlaySpeedChanged {
        /// New speed factor
        speed: f32,
    },
    /// Total duration changed
    TotalTimeChanged {
        /// New duration in seconds
        total_time: f32,
    },
    /// An audio driver was attached or detached
    AudioSourceChanged {
        /// Whether time is now driven by audio
        audio_driven: bool,
    },
    /// The editing flag changed
    EditingStateChanged {
        /// New editing state
        editing: bool,
    },
}

/// Synchronous observer of a sequence. Every method defaults to a no-op.
pub trait SequenceListener: Send + Sync {
    /// Playback started or stopped
    fn play_state_changed(&self, _playing: bool) {}
    /// The playhead moved from `prev_time` to `time`
    fn current_time_changed(&self, _prev_time: f32, _time: f32, _playing: bool) {}
    /// Playback looped
    fn looped(&self) {}
    /// Play speed changed
    fn play_speed_changed(&self, _speed: f32) {}
    /// Total time changed
    fn total_time_changed(&self, _total_time: f32) {}
    /// Audio driver attached or detached
    fn audio_source_changed(&self, _audio_driven: bool) {}
    /// Editing flag changed
    fn editing_state_changed(&self, _editing: bool) {}
}

fn deliver(listener: &dyn SequenceListener, event: &SequenceEvent) {
    match *event {
        SequenceEvent::PlayStateChanged { playing } => listener.play_state_changed(playing),
        SequenceEvent::CurrentTimeChanged {
            prev_time,
            time,
            playing,
        } => listener.current_time_changed(prev_time, time, playing),
        SequenceEvent::Looped => listener.looped(),
        SequenceEvent::PlaySpeedChanged { speed } => listener.play_speed_changed(speed),
        SequenceEvent::TotalTimeChanged { total_time } => listener.total_time_changed(total_time),
        SequenceEvent::AudioSourceChanged { audio_driven } => {
            listener.audio_source_changed(audio_driven);
        }
        SequenceEvent::EditingStateChanged { editing } => listener.editing_state_changed(editing),
    }
}

/// Registered synchronous listeners
#[derive(Default)]
pub struct ListenerList {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn SequenceListener>)>>,
}

impl ListenerList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn add(&self, listener: Arc<dyn SequenceListener>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.write().push((id, listener));
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `events` in order to every listener.
    ///
    /// The list lock is not held during delivery, so listeners may add or
    /// remove listeners.
    pub fn dispatch(&self, events: &[SequenceEvent]) {
        if events.is_empty() {
            return;
        }
        let snapshot: Vec<Arc<dyn SequenceListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for event in events {
            for listener in &snapshot {
                deliver(listener.as_ref(), event);
            }
        }
    }
}

/// Notifications that can be merged: two values with the same key are the same kind
pub trait Coalesce {
    /// Kind identifier
    type Key: Eq + Hash;

    /// The kind of this notification
    fn coalesce_key(&self) -> Self::Key;
}

/// Notification posted to the asynchronous channel of a sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceNotification {
    /// The editing flag changed
    EditingStateChanged {
        /// New editing state
        editing: bool,
    },
    /// Playback started or stopped
    PlayStateChanged {
        /// New play state
        playing: bool,
    },
}

impl Coalesce for SequenceNotification {
    type Key = std::mem::Discriminant<Self>;

    fn coalesce_key(&self) -> Self::Key {
        std::mem::discriminant(self)
    }
}

/// Configuration for the asynchronous notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Maximum queued notifications; the oldest is dropped on overflow
    pub capacity: usize,
    /// Coalescing period in milliseconds
    pub cycle_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            cycle_ms: 10,
        }
    }
}

impl NotifierConfig {
    /// Coalescing period
    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }
}

type AsyncCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct AsyncListeners<E> {
    plain: Vec<(ListenerId, AsyncCallback<E>)>,
    coalesced: Vec<(ListenerId, AsyncCallback<E>)>,
}

impl<E> Default for AsyncListeners<E> {
    fn default() -> Self {
        Self {
            plain: Vec::new(),
            coalesced: Vec::new(),
        }
    }
}

struct NotifierShared<E> {
    queue: Mutex<VecDeque<E>>,
    wake: Notify,
    closed: AtomicBool,
    listeners: RwLock<AsyncListeners<E>>,
}

/// Bounded, coalescing notification queue drained on a worker thread.
///
/// The worker is spawned with the first listener; before that, posted
/// notifications are discarded.
pub struct CoalescingNotifier<E> {
    shared: Arc<NotifierShared<E>>,
    config: NotifierConfig,
    worker_started: AtomicBool,
}

impl<E> CoalescingNotifier<E>
where
    E: Coalesce + Send + Sync + 'static,
{
    /// Create a notifier
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            shared: Arc::new(NotifierShared {
                queue: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                closed: AtomicBool::new(false),
                listeners: RwLock::new(AsyncListeners::default()),
            }),
            config,
            worker_started: AtomicBool::new(false),
        }
    }

    /// Queue a notification. Never blocks.
    pub fn notify(&self, event: E) {
        if !self.worker_started.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(event);
            if queue.len() > self.config.capacity.max(1) {
                queue.pop_front();
                tracing::warn!(
                    "Notification queue full ({}), dropped oldest",
                    self.config.capacity
                );
            }
        }
        self.shared.wake.notify_one();
    }

    /// Register a listener receiving every notification in order
    pub fn add_listener(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId::next();
        self.shared.listeners.write().plain.push((id, Arc::new(callback)));
        self.ensure_worker();
        id
    }

    /// Register a listener receiving only the latest notification of each kind per cycle
    pub fn add_coalesced_listener(
        &self,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId::next();
        self.shared
            .listeners
            .write()
            .coalesced
            .push((id, Arc::new(callback)));
        self.ensure_worker();
        id
    }

    /// Unregister a listener of either kind
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.plain.len() + listeners.coalesced.len();
        listeners.plain.retain(|(lid, _)| *lid != id);
        listeners.coalesced.retain(|(lid, _)| *lid != id);
        listeners.plain.len() + listeners.coalesced.len() != before
    }

    /// Notifier configuration
    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    fn ensure_worker(&self) {
        if self.worker_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let cycle = self.config.cycle();
        let spawned = std::thread::Builder::new()
            .name("sequence-notifier".to_string())
            .spawn(move || notifier_worker(shared, cycle));
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn notification worker: {e}");
            self.worker_started.store(false, Ordering::Release);
        }
    }
}

impl<E> Drop for CoalescingNotifier<E> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }
}

/// Worker thread that batches queued notifications once per cycle
fn notifier_worker<E: Coalesce>(shared: Arc<NotifierShared<E>>, cycle: Duration) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create notification runtime: {e}");
            return;
        }
    };

    rt.block_on(async {
        loop {
            shared.wake.notified().await;
            if shared.closed.load(Ordering::Acquire) {
                break;
            }
            // Let a burst accumulate before delivering
            tokio::time::sleep(cycle).await;
            let batch: Vec<E> = shared.queue.lock().drain(..).collect();
            if !batch.is_empty() {
                deliver_batch(&shared.listeners, &batch);
            }
        }
    });
}

fn deliver_batch<E: Coalesce>(listeners: &RwLock<AsyncListeners<E>>, batch: &[E]) {
    let (plain, coalesced): (Vec<AsyncCallback<E>>, Vec<AsyncCallback<E>>) = {
        let listeners = listeners.read();
        (
            listeners.plain.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            listeners.coalesced.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
        )
    };

    for event in batch {
        for callback in &plain {
            callback(event);
        }
    }

    if coalesced.is_empty() {
        return;
    }
    // Keeps first-seen kind order, last value per kind
    let mut latest: IndexMap<E::Key, &E> = IndexMap::new();
    for event in batch {
        latest.insert(event.coalesce_key(), event);
    }
    for event in latest.values() {
        for callback in &coalesced {
            callback(event);
        }
    }
}
