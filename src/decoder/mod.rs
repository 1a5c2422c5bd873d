//! Video decoding: RTP depacketization, H.264 decode and pixel
//! normalization to the packed RGB24 layout the rest of the core uses.

mod depacketizer;
mod ffmpeg;
pub mod yuv;

pub use depacketizer::H264Depacketizer;
pub use ffmpeg::H264Decoder;

use crate::error::DecodeError;

/// Decoded image before sequence stamping: packed RGB24 pixels.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Seam between the ingest loop and the codec.
///
/// `decode` consumes one encoded access unit and yields at most one image;
/// `Ok(None)` means the codec is still buffering (normal at stream start).
pub trait VideoDecode: Send {
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<DecodedImage>, DecodeError>;
}
