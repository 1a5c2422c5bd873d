//! Single-slot latest-wins mailbox for decoded frames
//!
//! The producer (decode loop) must never stall on a slow consumer, and the
//! consumer must never observe a stale frame once a newer one exists. A
//! single slot guarded by a mutex gives both properties: a write replaces
//! whatever is pending, a read takes the newest frame or nothing.
//!
//! # Invariants
//!
//! 1. Writing always succeeds; any unread previous frame is discarded first
//! 2. A reader observes either the most recently written frame or none
//! 3. The mutex is held only for the swap itself, never across decode or
//!    callback work

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::VideoFrame;

/// Latest-wins mailbox holding at most one pending frame.
#[derive(Debug, Default)]
pub struct FrameSlot {
    slot: Mutex<Option<VideoFrame>>,

    /// Frames discarded before anyone read them.
    dropped: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Store `frame`, discarding any unread predecessor.
    pub fn push(&self, frame: VideoFrame) {
        let mut slot = self.slot.lock().unwrap();
        if slot.replace(frame).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the pending frame, leaving the slot empty.
    pub fn take(&self) -> Option<VideoFrame> {
        self.slot.lock().unwrap().take()
    }

    /// Discard any pending frame (used on session teardown).
    pub fn clear(&self) {
        self.slot.lock().unwrap().take();
    }

    /// Number of frames overwritten before being read.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn frame(seq: u64) -> VideoFrame {
        VideoFrame::new(vec![seq as u8; 12], 2, 2, seq)
    }

    #[test]
    fn take_returns_pushed_frame() {
        let slot = FrameSlot::new();
        slot.push(frame(0));

        let got = slot.take().unwrap();
        assert_eq!(got.seq, 0);
        assert!(slot.take().is_none());
    }

    #[test]
    fn latest_wins_on_burst() {
        let slot = FrameSlot::new();
        for seq in 0..10 {
            slot.push(frame(seq));
        }

        // Only the newest frame survives
        let got = slot.take().unwrap();
        assert_eq!(got.seq, 9);
        assert!(slot.take().is_none());
        assert_eq!(slot.dropped(), 9);
    }

    #[test]
    fn clear_discards_pending() {
        let slot = FrameSlot::new();
        slot.push(frame(1));
        slot.clear();
        assert!(slot.take().is_none());
    }

    #[test]
    fn reader_never_observes_older_frame_after_newer_write() {
        let slot = Arc::new(FrameSlot::new());
        let writer_slot = Arc::clone(&slot);

        let writer = thread::spawn(move || {
            for seq in 0..500u64 {
                writer_slot.push(frame(seq));
            }
        });

        let mut last_seen = 0u64;
        let mut observed = 0u32;
        for _ in 0..2000 {
            if let Some(f) = slot.take() {
                assert!(
                    f.seq >= last_seen,
                    "went backwards: {} after {}",
                    f.seq,
                    last_seen
                );
                last_seen = f.seq;
                observed += 1;
            }
            thread::sleep(Duration::from_micros(50));
        }

        writer.join().unwrap();
        assert!(observed > 0);
    }

    #[test]
    fn frame_contents_are_never_torn() {
        let slot = Arc::new(FrameSlot::new());
        let writer_slot = Arc::clone(&slot);

        let writer = thread::spawn(move || {
            for seq in 0..1000u64 {
                writer_slot.push(VideoFrame::new(vec![(seq % 256) as u8; 256], 16, 16, seq));
            }
        });

        for _ in 0..1000 {
            if let Some(f) = slot.take() {
                let first = f.data[0];
                assert!(f.data.iter().all(|&b| b == first), "torn frame contents");
            }
        }

        writer.join().unwrap();
    }
}
