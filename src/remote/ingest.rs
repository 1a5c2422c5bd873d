//! Frame ingest: access units in, decoded frames out.
//!
//! The pipeline pulls complete access units from a [`TrackSource`], decodes
//! them and delivers each frame twice: into the latest-wins [`FrameSlot`]
//! for pull-style consumers and through the subscriber registry for
//! push-style ones. A single bad unit never stops the loop.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;

use crate::config::{DECODE_RETRY_DELAY, THROUGHPUT_WINDOW};
use crate::decoder::{DecodedImage, VideoDecode};
use crate::display::{FrameSlot, VideoFrame};
use crate::error::ConnectionError;
use crate::events::SubscriberRegistry;
use crate::utils::sos::SignalOfStop;

/// Supplier of complete encoded access units, in decode order.
#[async_trait]
pub trait TrackSource: Send {
    /// Next access unit; `Ok(None)` means the track ended normally.
    async fn next_unit(&mut self) -> Result<Option<Vec<u8>>, ConnectionError>;
}

/// [`TrackSource`] fed by the RTP reader through a bounded channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl TrackSource for ChannelSource {
    async fn next_unit(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        Ok(self.rx.recv().await)
    }
}

/// Decode loop state for one media session.
pub struct FrameIngestPipeline {
    slot: Arc<FrameSlot>,
    registry: Arc<SubscriberRegistry>,
    sos: SignalOfStop,

    /// Latched on the first decoded frame; the session keeps these
    /// dimensions even if the encoder renegotiates midway.
    dimensions: OnceCell<(u32, u32)>,
    seq: u64,
    window_start: Instant,
    window_frames: u64,
}

impl FrameIngestPipeline {
    pub fn new(slot: Arc<FrameSlot>, registry: Arc<SubscriberRegistry>, sos: SignalOfStop) -> Self {
        Self {
            slot,
            registry,
            sos,
            dimensions: OnceCell::new(),
            seq: 0,
            window_start: Instant::now(),
            window_frames: 0,
        }
    }

    /// Frame dimensions observed on the first decoded frame, if any yet.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions.get().copied()
    }

    /// Drive the loop until the source ends, a fatal read error occurs or
    /// the stop signal fires.
    pub async fn run(&mut self, source: &mut dyn TrackSource, decoder: &mut dyn VideoDecode) {
        loop {
            let unit = match self.sos.select(source.next_unit()).await {
                Some(Ok(Some(unit))) => unit,
                Some(Ok(None)) => {
                    log::info!("track ended after {} frames", self.seq);
                    return;
                }
                Some(Err(err)) => {
                    log::warn!("track read failed: {err}");
                    return;
                }
                None => return,
            };

            match decoder.decode(&unit) {
                Ok(Some(image)) => self.deliver(image),
                // Codec still buffering reference frames
                Ok(None) => {}
                Err(err) => {
                    log::warn!("dropping undecodable unit: {err}");
                    if self
                        .sos
                        .select(tokio::time::sleep(DECODE_RETRY_DELAY))
                        .await
                        .is_none()
                    {
                        return;
                    }
                }
            }
        }
    }

    fn deliver(&mut self, image: DecodedImage) {
        let dims = *self.dimensions.get_or_init(|| {
            log::info!("stream dimensions {}x{}", image.width, image.height);
            (image.width, image.height)
        });
        if (image.width, image.height) != dims {
            log::debug!(
                "frame size {}x{} differs from session dimensions {}x{}",
                image.width,
                image.height,
                dims.0,
                dims.1
            );
        }

        let frame = VideoFrame::new(image.data, image.width, image.height, self.seq);
        self.seq += 1;

        self.slot.push(frame.clone());
        self.registry.publish_frame(&frame);

        self.window_frames += 1;
        if self.window_frames >= THROUGHPUT_WINDOW {
            let elapsed = self.window_start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                log::info!(
                    "ingest throughput: {:.1} fps, {} frames overwritten unread",
                    self.window_frames as f64 / elapsed,
                    self.slot.dropped()
                );
            }
            self.window_frames = 0;
            self.window_start = Instant::now();
        }
    }
}
