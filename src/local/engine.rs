//! Paced local playback engine.
//!
//! One engine owns one openable source and at most one pacing thread. All
//! shared mutable state (source handle, playback state, position, current
//! frame) lives behind a single mutex; commands and the pacing loop take it
//! only for the duration of a read or mutation. Subscribers are always
//! invoked outside the lock.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{DECODE_RETRY_DELAY, FALLBACK_FPS, PAUSE_POLL_INTERVAL, WORKER_JOIN_TIMEOUT};
use crate::display::VideoFrame;
use crate::events::SubscriberRegistry;
use crate::local::source::VideoSource;

/// Playback state machine
///
/// Transitions are validated; combinations like "paused but not playing"
/// cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No pacing loop running; position parked at the current frame
    Stopped,

    /// Pacing loop delivering frames at the source rate
    Playing,

    /// Pacing loop alive but holding; resume continues in place
    Paused,
}

impl PlaybackState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PlaybackState) -> bool {
        use PlaybackState::*;

        match (self, target) {
            (a, b) if a == b => true,

            (Stopped, Playing) => true,

            (Playing, Paused) => true,
            (Playing, Stopped) => true,

            (Paused, Playing) => true,
            (Paused, Stopped) => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

struct Shared {
    source: Option<Box<dyn VideoSource>>,
    fps: f64,
    frame_count: u64,
    duration: f64,
    state: PlaybackState,
    position_secs: f64,
    position_frame: u64,
    current: Option<VideoFrame>,
    /// Set while a seek repositions the source; the pacing loop yields
    /// instead of racing the repositioning read.
    seeking: bool,
    stop_requested: bool,
    /// Index of the frame the source will produce on the next read.
    next_frame_index: u64,
    seq: u64,
}

impl Shared {
    fn set_state(&mut self, target: PlaybackState) {
        if self.state.can_transition_to(&target) {
            self.state = target;
        } else {
            log::warn!("rejected playback state transition {} -> {}", self.state, target);
        }
    }
}

struct EngineInner {
    shared: Mutex<Shared>,
    cond: Condvar,
    registry: Arc<SubscriberRegistry>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Local playback engine with play/pause/stop/seek under concurrent
/// external control.
pub struct LocalPlaybackEngine {
    inner: Arc<EngineInner>,
}

impl LocalPlaybackEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                shared: Mutex::new(Shared {
                    source: None,
                    fps: FALLBACK_FPS,
                    frame_count: 0,
                    duration: 0.0,
                    state: PlaybackState::Stopped,
                    position_secs: 0.0,
                    position_frame: 0,
                    current: None,
                    seeking: false,
                    stop_requested: false,
                    next_frame_index: 0,
                    seq: 0,
                }),
                cond: Condvar::new(),
                registry: Arc::new(SubscriberRegistry::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.inner.registry
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.shared.lock().unwrap().state
    }

    pub fn is_open(&self) -> bool {
        self.inner.shared.lock().unwrap().source.is_some()
    }

    pub fn duration(&self) -> f64 {
        self.inner.shared.lock().unwrap().duration
    }

    /// Current position as (seconds, frame index).
    pub fn position(&self) -> (f64, u64) {
        let shared = self.inner.shared.lock().unwrap();
        (shared.position_secs, shared.position_frame)
    }

    pub fn current_frame(&self) -> Option<VideoFrame> {
        self.inner.shared.lock().unwrap().current.clone()
    }

    /// Install `source`, closing any previous one first. Reads and
    /// publishes frame 0; fails without retaining anything if that read
    /// fails.
    pub fn open(&self, mut source: Box<dyn VideoSource>) -> bool {
        if self.is_open() {
            self.close();
        }

        let first = match source.read_frame() {
            Ok(Some(image)) => image,
            Ok(None) => {
                log::warn!("source has no frames");
                return false;
            }
            Err(err) => {
                log::warn!("cannot read first frame: {err}");
                return false;
            }
        };

        let info = source.info();
        let fps = if info.fps > 0.0 { info.fps } else { FALLBACK_FPS };
        let duration = if info.frame_count > 0 {
            info.frame_count as f64 / fps
        } else {
            0.0
        };

        let mut shared = self.inner.shared.lock().unwrap();
        let seq = shared.seq;
        shared.seq += 1;
        let frame = VideoFrame::new(first.data, first.width, first.height, seq);
        shared.source = Some(source);
        shared.fps = fps;
        shared.frame_count = info.frame_count;
        shared.duration = duration;
        shared.state = PlaybackState::Stopped;
        shared.position_secs = 0.0;
        shared.position_frame = 0;
        shared.next_frame_index = 1;
        shared.current = Some(frame.clone());
        shared.seeking = false;
        shared.stop_requested = false;
        drop(shared);

        self.inner.registry.publish_frame(&frame);
        self.inner.registry.publish_progress(0.0, duration);
        true
    }

    /// Release the source and halt the pacing loop. Idempotent: always
    /// succeeds, notifies playback-stopped at most once.
    pub fn close(&self) -> bool {
        let mut worker = self.inner.worker.lock().unwrap();
        Self::halt_worker(&self.inner, &mut worker);

        let mut shared = self.inner.shared.lock().unwrap();
        let had_source = shared.source.take().is_some();
        shared.set_state(PlaybackState::Stopped);
        shared.position_secs = 0.0;
        shared.position_frame = 0;
        shared.next_frame_index = 0;
        shared.current = None;
        shared.seeking = false;
        shared.stop_requested = false;
        drop(shared);

        if had_source {
            self.inner.registry.publish_playback_state(false, false);
        }
        true
    }

    /// Start or resume playback.
    pub fn play(&self) -> bool {
        let mut worker = self.inner.worker.lock().unwrap();
        let mut shared = self.inner.shared.lock().unwrap();
        if shared.source.is_none() {
            return false;
        }

        match shared.state {
            PlaybackState::Playing => true,
            PlaybackState::Paused => {
                shared.set_state(PlaybackState::Playing);
                drop(shared);
                self.inner.cond.notify_all();
                self.inner.registry.publish_playback_state(true, false);
                true
            }
            PlaybackState::Stopped => {
                shared.set_state(PlaybackState::Playing);
                shared.stop_requested = false;
                drop(shared);

                let inner = Arc::clone(&self.inner);
                match thread::Builder::new()
                    .name("playback-pacer".into())
                    .spawn(move || Self::pacing_loop(inner))
                {
                    Ok(handle) => {
                        *worker = Some(handle);
                        self.inner.registry.publish_playback_state(true, false);
                        true
                    }
                    Err(err) => {
                        log::error!("cannot spawn pacing loop: {err}");
                        let mut shared = self.inner.shared.lock().unwrap();
                        shared.set_state(PlaybackState::Stopped);
                        false
                    }
                }
            }
        }
    }

    /// Hold playback in place; fails when not playing.
    pub fn pause(&self) -> bool {
        let mut shared = self.inner.shared.lock().unwrap();
        if shared.state != PlaybackState::Playing {
            return false;
        }
        shared.set_state(PlaybackState::Paused);
        drop(shared);
        self.inner.registry.publish_playback_state(true, true);
        true
    }

    /// Halt playback and rewind to frame 0; fails when already stopped.
    pub fn stop(&self) -> bool {
        let mut worker = self.inner.worker.lock().unwrap();
        {
            let shared = self.inner.shared.lock().unwrap();
            if shared.source.is_none() || shared.state == PlaybackState::Stopped {
                return false;
            }
        }
        Self::halt_worker(&self.inner, &mut worker);

        let mut shared = self.inner.shared.lock().unwrap();
        shared.set_state(PlaybackState::Stopped);
        shared.stop_requested = false;

        let first = shared.source.as_mut().and_then(|source| {
            source.seek_to_frame(0).ok()?;
            source.read_frame().ok().flatten()
        });
        let frame = first.map(|image| {
            let seq = shared.seq;
            shared.seq += 1;
            let frame = VideoFrame::new(image.data, image.width, image.height, seq);
            shared.current = Some(frame.clone());
            frame
        });
        shared.position_secs = 0.0;
        shared.position_frame = 0;
        shared.next_frame_index = 1;
        let duration = shared.duration;
        drop(shared);

        if let Some(frame) = frame {
            self.inner.registry.publish_frame(&frame);
        }
        self.inner.registry.publish_progress(0.0, duration);
        self.inner.registry.publish_playback_state(false, false);
        true
    }

    /// Seek to `seconds`, clamped into `[0, duration]`. Fails only when
    /// the read after repositioning fails.
    pub fn seek(&self, seconds: f64) -> bool {
        let shared = self.inner.shared.lock().unwrap();
        if shared.source.is_none() {
            return false;
        }

        let mut target = seconds.max(0.0);
        if shared.duration > 0.0 {
            target = target.min(shared.duration);
        }
        let mut index = (target * shared.fps).round() as u64;
        if shared.frame_count > 0 {
            index = index.min(shared.frame_count - 1);
        }
        self.seek_locked(shared, index, target)
    }

    /// Seek by frame index, clamped into `[0, frameCount-1]`.
    pub fn seek_frame(&self, index: u64) -> bool {
        let shared = self.inner.shared.lock().unwrap();
        if shared.source.is_none() {
            return false;
        }

        let index = if shared.frame_count > 0 {
            index.min(shared.frame_count - 1)
        } else {
            index
        };
        let position = index as f64 / shared.fps;
        self.seek_locked(shared, index, position)
    }

    fn seek_locked(
        &self,
        mut shared: MutexGuard<'_, Shared>,
        index: u64,
        position_secs: f64,
    ) -> bool {
        shared.seeking = true;

        let image = shared.source.as_mut().and_then(|source| {
            if let Err(err) = source.seek_to_frame(index) {
                log::warn!("seek to frame {index} failed: {err}");
                return None;
            }
            match source.read_frame() {
                Ok(Some(image)) => Some(image),
                Ok(None) => None,
                Err(err) => {
                    log::warn!("read after seek failed: {err}");
                    None
                }
            }
        });

        let Some(image) = image else {
            shared.seeking = false;
            return false;
        };

        let seq = shared.seq;
        shared.seq += 1;
        let frame = VideoFrame::new(image.data, image.width, image.height, seq);
        shared.current = Some(frame.clone());
        shared.position_frame = index;
        shared.position_secs = position_secs;
        shared.next_frame_index = index + 1;
        shared.seeking = false;
        let duration = shared.duration;
        drop(shared);

        self.inner.registry.publish_frame(&frame);
        self.inner.registry.publish_progress(position_secs, duration);
        true
    }

    fn halt_worker(inner: &EngineInner, worker: &mut Option<thread::JoinHandle<()>>) {
        let Some(handle) = worker.take() else {
            return;
        };

        {
            let mut shared = inner.shared.lock().unwrap();
            shared.stop_requested = true;
        }
        inner.cond.notify_all();

        let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            log::warn!("pacing loop did not stop in time, detaching");
        }
    }

    /// Background frame pump: reads one frame per interval and sleeps the
    /// remainder, auto-looping at end of stream.
    fn pacing_loop(inner: Arc<EngineInner>) {
        loop {
            let iteration_start = Instant::now();
            let mut shared = inner.shared.lock().unwrap();

            if shared.stop_requested {
                return;
            }
            if shared.state == PlaybackState::Paused {
                let (guard, _) = inner
                    .cond
                    .wait_timeout(shared, PAUSE_POLL_INTERVAL)
                    .unwrap();
                drop(guard);
                continue;
            }
            if shared.seeking {
                drop(shared);
                thread::sleep(Duration::from_millis(2));
                continue;
            }

            let Some(source) = shared.source.as_mut() else {
                return;
            };

            let image = match source.read_frame() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    // End of stream: wrap to frame 0
                    let rewound = source.seek_to_frame(0).and_then(|_| source.read_frame());
                    match rewound {
                        Ok(Some(image)) => {
                            shared.next_frame_index = 0;
                            image
                        }
                        _ => {
                            log::warn!("rewind after end of stream failed, stopping playback");
                            shared.set_state(PlaybackState::Stopped);
                            drop(shared);
                            inner.registry.publish_playback_state(false, false);
                            return;
                        }
                    }
                }
                Err(err) => {
                    log::warn!("frame read failed: {err}");
                    drop(shared);
                    thread::sleep(DECODE_RETRY_DELAY);
                    continue;
                }
            };

            let fps = shared.fps;
            let index = shared.next_frame_index;
            shared.next_frame_index = index + 1;
            let seq = shared.seq;
            shared.seq += 1;

            let frame = VideoFrame::new(image.data, image.width, image.height, seq);
            shared.current = Some(frame.clone());
            shared.position_frame = index;
            shared.position_secs = index as f64 / fps;
            let position = shared.position_secs;
            let duration = shared.duration;
            drop(shared);

            inner.registry.publish_frame(&frame);
            inner.registry.publish_progress(position, duration);

            let target = Duration::from_secs_f64(1.0 / fps);
            if let Some(rest) = target.checked_sub(iteration_start.elapsed()) {
                thread::sleep(rest);
            }
        }
    }
}

impl Default for LocalPlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalPlaybackEngine {
    fn drop(&mut self) {
        self.close();
    }
}
