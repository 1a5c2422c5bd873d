//! HTTP signaling: one POST round trip exchanging SDP with the media server.
//!
//! The server speaks a JSON play API: we send our offer together with the
//! stream locator, it answers with `{code: 0, sdp: "..."}`. Anything else is
//! a failed negotiation attempt; the reconnect policy decides what to do
//! with it.

use serde::{Deserialize, Serialize};

use crate::config::PlayerSettings;
use crate::error::SignalingError;

/// Protocol identifier the play API matches on.
const PROTOCOL_API: &str = "webrtc-player";

#[derive(Debug, Serialize)]
struct PlayRequest<'a> {
    api: &'a str,
    streamurl: &'a str,
    sdp: &'a str,
    /// Millisecond timestamp used by the server to break duplicate-session
    /// ties; later requests win.
    tiebreaker: i64,
    codec: &'a str,
    enable_audio: bool,
}

#[derive(Debug, Deserialize)]
struct PlayResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    sdp: Option<String>,
}

/// One signaling endpoint, reused across reconnect attempts.
pub struct SignalingExchange {
    http: reqwest::Client,
    api_url: String,
    stream_url: String,
    codec: String,
}

impl SignalingExchange {
    pub fn new(settings: &PlayerSettings) -> Result<Self, SignalingError> {
        let http = reqwest::Client::builder()
            .timeout(settings.signaling_timeout)
            .build()
            .map_err(SignalingError::Transport)?;

        Ok(Self {
            http,
            api_url: settings.signaling_url.clone(),
            stream_url: settings.stream_url.clone(),
            codec: settings.codec.clone(),
        })
    }

    /// Send `offer_sdp` and return the server's answer SDP.
    pub async fn negotiate(&self, offer_sdp: &str) -> Result<String, SignalingError> {
        let request = PlayRequest {
            api: PROTOCOL_API,
            streamurl: &self.stream_url,
            sdp: offer_sdp,
            tiebreaker: chrono::Utc::now().timestamp_millis(),
            codec: &self.codec,
            enable_audio: false,
        };

        log::debug!("signaling offer to {} for {}", self.api_url, self.stream_url);

        let response = self
            .http
            .post(self.api_url.as_str())
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalingError::BadStatus(status.as_u16()));
        }

        let body = response.text().await.map_err(classify_transport)?;
        parse_answer(&body)
    }
}

fn classify_transport(err: reqwest::Error) -> SignalingError {
    if err.is_timeout() {
        SignalingError::Timeout
    } else {
        SignalingError::Transport(err)
    }
}

/// Decode the play response body into an answer SDP.
fn parse_answer(body: &str) -> Result<String, SignalingError> {
    let response: PlayResponse =
        serde_json::from_str(body).map_err(|e| SignalingError::BadBody(e.to_string()))?;

    if response.code != 0 {
        return Err(SignalingError::Rejected {
            code: response.code,
            message: response.msg.unwrap_or_default(),
        });
    }

    match response.sdp {
        Some(sdp) if !sdp.is_empty() => Ok(sdp),
        _ => Err(SignalingError::BadBody("answer sdp missing".into())),
    }
}
