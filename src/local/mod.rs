//! Local playback: file-backed sources and the paced frame pump.

pub mod engine;
pub mod source;

pub use engine::{LocalPlaybackEngine, PlaybackState};
pub use source::{FileSource, VideoSource};
