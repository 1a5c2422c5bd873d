//! Player settings and tuning constants.

use std::time::Duration;

/// Frame rate assumed when a source reports none or a nonsensical value.
pub const FALLBACK_FPS: f64 = 30.0;

/// Frames per throughput report in the ingest pipeline.
pub const THROUGHPUT_WINDOW: u64 = 30;

/// Pause between retries after a transient decode failure.
pub const DECODE_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Interval at which a paused pacing loop re-checks its flags.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on waiting for a worker to wind down during close().
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on ICE plus DTLS establishment for one connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for one remote streaming session.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    /// HTTP signaling endpoint, e.g. `http://host:1985/rtc/v1/play/`.
    pub signaling_url: String,
    /// Stream locator passed through to the signaling server.
    pub stream_url: String,
    /// Preferred codec order advertised during negotiation.
    pub codec: String,
    /// Bound on the signaling round trip.
    pub signaling_timeout: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_cooldown: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            signaling_url: String::new(),
            stream_url: String::new(),
            codec: "h264".to_string(),
            signaling_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            reconnect_cooldown: Duration::from_millis(500),
        }
    }
}
