//! Remote playback: WebRTC streaming with bounded reconnect.

pub mod connection;
pub mod ingest;
pub mod signaling;
pub mod webrtc;

pub use connection::{ConnectionState, StreamClient};
