//! Frame handoff between the decode domains and their consumers.

mod frame_slot;

pub use frame_slot::FrameSlot;

/// Decoded video frame with raw pixel data.
///
/// Pixels are packed RGB24: `width * height * 3` bytes, rows top to bottom,
/// no stride padding. `seq` is a per-producer monotonic sequence id used to
/// detect drops and ordering downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub seq: u64,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, seq: u64) -> Self {
        Self {
            data,
            width,
            height,
            seq,
        }
    }

    /// Size of the pixel buffer in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
