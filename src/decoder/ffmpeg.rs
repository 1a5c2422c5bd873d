use ac_ffmpeg::codec::video::VideoDecoder;
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp};

use super::yuv::{yuv420_to_rgb24, Plane};
use super::{DecodedImage, VideoDecode};
use crate::error::DecodeError;

/// H.264 video decoder backed by FFmpeg.
///
/// Consumes Annex B access units and produces packed RGB24 images. The
/// output buffer is reused across frames to avoid a per-frame allocation.
pub struct H264Decoder {
    decoder: VideoDecoder,
    frame_count: i64,
    rgb_buffer: Vec<u8>,
}

// The decoder context is only driven from the ingest task.
unsafe impl Send for H264Decoder {}

impl H264Decoder {
    /// Create a new H.264 decoder on the 90 kHz RTP clock.
    pub fn new() -> Result<Self, DecodeError> {
        let decoder = VideoDecoder::builder("h264")?
            .time_base(TimeBase::new(1, 90_000))
            .build()?;

        Ok(Self {
            decoder,
            frame_count: 0,
            rgb_buffer: Vec::new(),
        })
    }

    #[inline]
    fn next_pts(&mut self) -> Timestamp {
        self.frame_count += 1;
        Timestamp::new(self.frame_count, TimeBase::new(1, 90_000))
    }
}

impl VideoDecode for H264Decoder {
    /// Decode one access unit. `Ok(None)` while the codec is still
    /// buffering reference frames.
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<DecodedImage>, DecodeError> {
        let pts = self.next_pts();
        let packet = PacketMut::from(access_unit).with_pts(pts).freeze();

        self.decoder
            .try_push(packet)
            .map_err(|err| DecodeError::Codec(err.to_string()))?;

        let frame = match self
            .decoder
            .take()
            .map_err(|err| DecodeError::Codec(err.to_string()))?
        {
            Some(frame) => frame,
            None => return Ok(None),
        };

        let width = frame.width();
        let height = frame.height();
        let planes = frame.planes();
        if planes.len() < 3 {
            return Err(DecodeError::UnsupportedLayout(planes.len()));
        }

        yuv420_to_rgb24(
            Plane {
                data: planes[0].data(),
                stride: planes[0].line_size(),
            },
            Plane {
                data: planes[1].data(),
                stride: planes[1].line_size(),
            },
            Plane {
                data: planes[2].data(),
                stride: planes[2].line_size(),
            },
            width,
            height,
            &mut self.rgb_buffer,
        );

        Ok(Some(DecodedImage {
            data: self.rgb_buffer.clone(),
            width: width as u32,
            height: height as u32,
        }))
    }
}
