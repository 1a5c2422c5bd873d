//! Error taxonomy for the playback core.
//!
//! Transient faults (single bad frame, one failed negotiation) are absorbed
//! close to where they happen; only budget exhaustion and unrecoverable
//! source faults surface to callers, and those arrive as state notifications
//! or boolean results rather than panics.

use thiserror::Error;

/// Failure of a single signaling round trip. Fatal to the current
/// negotiation attempt; the reconnect policy decides what happens next.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling transport: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("signaling request timed out")]
    Timeout,
    #[error("signaling server returned HTTP {0}")]
    BadStatus(u16),
    #[error("malformed signaling response: {0}")]
    BadBody(String),
    #[error("signaling server rejected negotiation (code {code}): {message}")]
    Rejected { code: i64, message: String },
}

/// Transport-level session failure. Drives the reconnect transition.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("transport closed: {0}")]
    TransportClosed(String),
    #[error("connection attempt cancelled")]
    Cancelled,
}

/// A single frame failed to decode. Transient: the ingest loop logs it,
/// backs off briefly and continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("ffmpeg: {0}")]
    Ffmpeg(#[from] ac_ffmpeg::Error),
    #[error("codec: {0}")]
    Codec(String),
    #[error("unsupported pixel layout ({0} planes)")]
    UnsupportedLayout(usize),
}

/// Local source fault: the source cannot be opened, read or repositioned.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("media: {0}")]
    Media(#[from] ac_ffmpeg::Error),
    #[error("codec: {0}")]
    Codec(String),
    #[error("source has no video stream")]
    NoVideoStream,
    #[error("unsupported pixel layout ({0} planes)")]
    UnsupportedLayout(usize),
}
