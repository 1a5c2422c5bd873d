//! Local video sources demuxed and decoded through FFmpeg.

use std::fs::File;
use std::path::{Path, PathBuf};

use ac_ffmpeg::codec::video::VideoDecoder;
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;

use crate::decoder::yuv::{yuv420_to_rgb24, Plane};
use crate::decoder::DecodedImage;
use crate::error::SourceError;

/// Static properties of an open source.
///
/// `frame_count` and `fps` are 0 when the container does not report them;
/// the playback engine substitutes its fallback rate in that case.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceInfo {
    pub frame_count: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// Seam between the playback engine and the container/codec stack.
pub trait VideoSource: Send {
    fn info(&self) -> SourceInfo;

    /// Decode the next frame as packed RGB24; `Ok(None)` at end of stream.
    fn read_frame(&mut self) -> Result<Option<DecodedImage>, SourceError>;

    /// Reposition so the next read returns frame `index`.
    fn seek_to_frame(&mut self, index: u64) -> Result<(), SourceError>;
}

/// File-backed source decoding one video stream.
///
/// Seeks are frame accurate: a backwards seek reopens the container and
/// decodes forward to the target, so the cost is proportional to the
/// target index but the result never lands on a nearby keyframe instead.
pub struct FileSource {
    path: PathBuf,
    demuxer: DemuxerWithStreamInfo<File>,
    decoder: VideoDecoder,
    stream_index: usize,
    info: SourceInfo,
    /// Index of the frame the next read will produce.
    next_index: u64,
    flushed: bool,
    rgb_buffer: Vec<u8>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let (demuxer, decoder, stream_index, info) = Self::open_container(&path)?;

        log::info!(
            "opened {}: {}x{}, {} frames at {:.2} fps",
            path.display(),
            info.width,
            info.height,
            info.frame_count,
            info.fps
        );

        Ok(Self {
            path,
            demuxer,
            decoder,
            stream_index,
            info,
            next_index: 0,
            flushed: false,
            rgb_buffer: Vec::new(),
        })
    }

    fn open_container(
        path: &Path,
    ) -> Result<(DemuxerWithStreamInfo<File>, VideoDecoder, usize, SourceInfo), SourceError> {
        let input = File::open(path)?;
        let io = IO::from_seekable_read_stream(input);

        let demuxer = Demuxer::builder()
            .build(io)?
            .find_stream_info(None)
            .map_err(|(_, err)| err)?;

        let (stream_index, stream) = demuxer
            .streams()
            .iter()
            .enumerate()
            .find(|(_, stream)| stream.codec_parameters().is_video_codec())
            .ok_or(SourceError::NoVideoStream)?;

        let params = stream
            .codec_parameters()
            .into_video_codec_parameters()
            .ok_or(SourceError::NoVideoStream)?;

        let frame_count = stream.frames().unwrap_or(0);
        let duration_secs = stream
            .duration()
            .as_micros()
            .map(|us| us as f64 / 1_000_000.0)
            .unwrap_or(0.0);
        let fps = if frame_count > 0 && duration_secs > 0.0 {
            frame_count as f64 / duration_secs
        } else {
            0.0
        };

        let info = SourceInfo {
            frame_count,
            fps,
            width: params.width() as u32,
            height: params.height() as u32,
        };

        let decoder = VideoDecoder::from_codec_parameters(&params)?.build()?;

        Ok((demuxer, decoder, stream_index, info))
    }

    /// Decode the next frame of the video stream without converting it.
    fn decode_next(&mut self) -> Result<Option<ac_ffmpeg::codec::video::VideoFrame>, SourceError> {
        loop {
            if let Some(frame) = self
                .decoder
                .take()
                .map_err(|err| SourceError::Codec(err.to_string()))?
            {
                self.next_index += 1;
                return Ok(Some(frame));
            }
            if self.flushed {
                return Ok(None);
            }
            match self.demuxer.take()? {
                Some(packet) if packet.stream_index() == self.stream_index => {
                    self.decoder
                        .try_push(packet)
                        .map_err(|err| SourceError::Codec(err.to_string()))?;
                }
                Some(_) => {}
                None => {
                    self.decoder
                        .flush()
                        .map_err(|err| SourceError::Codec(err.to_string()))?;
                    self.flushed = true;
                }
            }
        }
    }

    fn convert(&mut self, frame: ac_ffmpeg::codec::video::VideoFrame) -> Result<DecodedImage, SourceError> {
        let width = frame.width();
        let height = frame.height();
        let planes = frame.planes();
        if planes.len() < 3 {
            return Err(SourceError::UnsupportedLayout(planes.len()));
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

        Ok(DecodedImage {
            data: self.rgb_buffer.clone(),
            width: width as u32,
            height: height as u32,
        })
    }
}

impl VideoSource for FileSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn read_frame(&mut self) -> Result<Option<DecodedImage>, SourceError> {
        match self.decode_next()? {
            Some(frame) => Ok(Some(self.convert(frame)?)),
            None => Ok(None),
        }
    }

    fn seek_to_frame(&mut self, index: u64) -> Result<(), SourceError> {
        let index = if self.info.frame_count > 0 {
            index.min(self.info.frame_count - 1)
        } else {
            index
        };

        if index < self.next_index {
            let (demuxer, decoder, stream_index, _) = Self::open_container(&self.path)?;
            self.demuxer = demuxer;
            self.decoder = decoder;
            self.stream_index = stream_index;
            self.next_index = 0;
            self.flushed = false;
        }

        while self.next_index < index {
            if self.decode_next()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

// The FFmpeg contexts are only touched under the engine lock.
unsafe impl Send for FileSource {}
