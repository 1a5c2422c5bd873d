//! Subscriber registry: typed fan-out of frames, playback state and progress.
//!
//! Both playback domains publish through the same registry. Delivery is
//! synchronous and in registration order; a subscriber that panics is
//! isolated and logged so the remaining subscribers still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::display::VideoFrame;

/// Event categories a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Decoded frames ready for display.
    Frame,
    /// Playing/paused transitions.
    PlaybackState,
    /// Position/duration updates.
    Progress,
}

/// Observer interface consumed by the presentation layer.
///
/// Implementors override only the methods matching the kinds they
/// subscribe for; the defaults ignore the event.
pub trait PlayerSubscriber: Send + Sync {
    fn on_frame(&self, _frame: &VideoFrame) {}
    fn on_playback_state(&self, _playing: bool, _paused: bool) {}
    fn on_progress(&self, _position_secs: f64, _duration_secs: f64) {}
}

/// Insertion-ordered registry of [`PlayerSubscriber`]s.
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: Mutex<Vec<(EventKind, Arc<dyn PlayerSubscriber>)>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register `subscriber` for `kind`. A duplicate registration of the
    /// same subscriber for the same kind is a no-op; returns whether the
    /// registration was new.
    pub fn subscribe(&self, kind: EventKind, subscriber: Arc<dyn PlayerSubscriber>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if entries
            .iter()
            .any(|(k, s)| *k == kind && Arc::ptr_eq(s, &subscriber))
        {
            return false;
        }
        entries.push((kind, subscriber));
        true
    }

    /// Remove every registration of `subscriber`, by identity.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn PlayerSubscriber>) {
        self.entries
            .lock()
            .unwrap()
            .retain(|(_, s)| !Arc::ptr_eq(s, subscriber));
    }

    pub fn publish_frame(&self, frame: &VideoFrame) {
        for sub in self.matching(EventKind::Frame) {
            Self::guarded("on_frame", || sub.on_frame(frame));
        }
    }

    pub fn publish_playback_state(&self, playing: bool, paused: bool) {
        for sub in self.matching(EventKind::PlaybackState) {
            Self::guarded("on_playback_state", || sub.on_playback_state(playing, paused));
        }
    }

    pub fn publish_progress(&self, position_secs: f64, duration_secs: f64) {
        for sub in self.matching(EventKind::Progress) {
            Self::guarded("on_progress", || sub.on_progress(position_secs, duration_secs));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Snapshot the matching subscribers so handlers run outside the lock
    /// and may themselves subscribe/unsubscribe.
    fn matching(&self, kind: EventKind) -> Vec<Arc<dyn PlayerSubscriber>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, s)| Arc::clone(s))
            .collect()
    }

    fn guarded<F: FnOnce()>(what: &str, f: F) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            log::warn!("subscriber panicked in {what}, continuing with remaining subscribers");
        }
    }
}
