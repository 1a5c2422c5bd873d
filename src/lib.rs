//! Real-time media playback core.
//!
//! Two independent playback domains share one delivery surface: a WebRTC
//! streaming client with bounded automatic reconnection ([`remote`]) and a
//! paced local-source engine with play/pause/stop/seek ([`local`]). Both
//! hand decoded frames to consumers through a latest-wins mailbox
//! ([`display::FrameSlot`]) and a synchronous subscriber registry
//! ([`events::SubscriberRegistry`]).

pub mod config;
pub mod context;
pub mod decoder;
pub mod display;
pub mod error;
pub mod events;
pub mod local;
pub mod remote;
pub mod utils;
