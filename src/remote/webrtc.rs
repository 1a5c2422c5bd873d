//! WebRTC transport: peer setup, offer/answer negotiation and RTP intake.
//!
//! Each connection attempt builds a fresh peer connection, negotiates over
//! the HTTP signaling exchange and wires the incoming video track through
//! the depacketizer into the ingest pipeline. Releasing the session tears
//! all of it down; a reconnect starts from scratch.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use super::connection::{ActiveSession, SessionConnector};
use super::ingest::{ChannelSource, FrameIngestPipeline};
use super::signaling::SignalingExchange;
use crate::config::{PlayerSettings, CONNECT_TIMEOUT};
use crate::decoder::{H264Decoder, H264Depacketizer};
use crate::display::FrameSlot;
use crate::error::ConnectionError;
use crate::events::SubscriberRegistry;
use crate::utils::sos::SignalOfStop;

/// Builds one WebRTC session per connect call.
pub struct WebRtcConnector {
    signaling: SignalingExchange,
    slot: Arc<FrameSlot>,
    registry: Arc<SubscriberRegistry>,
    sos: SignalOfStop,
}

impl WebRtcConnector {
    pub fn new(
        settings: &PlayerSettings,
        slot: Arc<FrameSlot>,
        registry: Arc<SubscriberRegistry>,
        sos: SignalOfStop,
    ) -> Result<Self, ConnectionError> {
        Ok(Self {
            signaling: SignalingExchange::new(settings)?,
            slot,
            registry,
            sos,
        })
    }

    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, ConnectionError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let connection = api.new_peer_connection(RTCConfiguration::default()).await?;
        Ok(Arc::new(connection))
    }
}

#[async_trait]
impl SessionConnector for WebRtcConnector {
    async fn connect(&mut self) -> Result<Box<dyn ActiveSession>, ConnectionError> {
        let pc = self.new_peer_connection().await?;
        pc.add_transceiver_from_kind(RTPCodecType::Video, None)
            .await?;

        // Complete access units flow from the track readers to the ingest
        // loop; the senders live inside the on_track callback.
        let (au_tx, au_rx) = mpsc::channel::<Vec<u8>>(32);
        let track_sos = self.sos.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let au_tx = au_tx.clone();
            let sos = track_sos.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Video {
                    log::debug!("ignoring non-video track {}", track.id());
                    return;
                }
                log::info!(
                    "incoming video track {} ({})",
                    track.id(),
                    track.codec().capability.mime_type
                );
                sos.spawn(async move {
                    let mut depacketizer = H264Depacketizer::new();
                    while let Ok((packet, _)) = track.read_rtp().await {
                        if let Some(unit) =
                            depacketizer.push(&packet.payload, packet.header.marker)
                        {
                            if au_tx.send(unit).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            })
        }));

        let (state_tx, mut state_rx) = mpsc::unbounded_channel();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            log::debug!("peer connection state: {state}");
            let _ = state_tx.send(state);
            Box::pin(async {})
        }));

        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer).await?;

        // Wait for ICE gathering so the offer carries all candidates; the
        // play API only allows a single signaling round trip.
        let mut gathered = pc.gathering_complete_promise().await;
        gathered.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| ConnectionError::TransportClosed("no local description".into()))?;

        let answer_sdp = match self.signaling.negotiate(&local.sdp).await {
            Ok(sdp) => sdp,
            Err(err) => {
                let _ = pc.close().await;
                return Err(err.into());
            }
        };

        let answer = RTCSessionDescription::answer(answer_sdp)?;
        if let Err(err) = pc.set_remote_description(answer).await {
            let _ = pc.close().await;
            return Err(err.into());
        }

        // Block until the transport is actually up; a stuck ICE exchange
        // counts against the reconnect budget instead of hanging forever.
        let outcome = self
            .sos
            .select(tokio::time::timeout(CONNECT_TIMEOUT, async {
                while let Some(state) = state_rx.recv().await {
                    match state {
                        RTCPeerConnectionState::Connected => return true,
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                            return false
                        }
                        _ => {}
                    }
                }
                false
            }))
            .await;

        match outcome {
            None => {
                let _ = pc.close().await;
                return Err(ConnectionError::Cancelled);
            }
            Some(Ok(true)) => {}
            Some(Ok(false)) => {
                let _ = pc.close().await;
                return Err(ConnectionError::TransportClosed(
                    "transport failed during setup".into(),
                ));
            }
            Some(Err(_)) => {
                let _ = pc.close().await;
                return Err(ConnectionError::TransportClosed(
                    "connection attempt timed out".into(),
                ));
            }
        }

        let ingest = {
            let slot = Arc::clone(&self.slot);
            let registry = Arc::clone(&self.registry);
            let sos = self.sos.clone();
            tokio::spawn(async move {
                let mut decoder = match H264Decoder::new() {
                    Ok(decoder) => decoder,
                    Err(err) => {
                        log::error!("cannot open h264 decoder: {err}");
                        return;
                    }
                };
                let mut pipeline = FrameIngestPipeline::new(slot, registry, sos);
                let mut source = ChannelSource::new(au_rx);
                pipeline.run(&mut source, &mut decoder).await;
            })
        };

        Ok(Box::new(WebRtcSession {
            pc,
            state_rx,
            ingest,
        }))
    }
}

/// A live peer connection plus its ingest task.
struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    state_rx: mpsc::UnboundedReceiver<RTCPeerConnectionState>,
    ingest: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl ActiveSession for WebRtcSession {
    async fn closed(&mut self) -> ConnectionError {
        while let Some(state) = self.state_rx.recv().await {
            match state {
                RTCPeerConnectionState::Disconnected
                | RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed => {
                    return ConnectionError::TransportClosed(state.to_string());
                }
                _ => {}
            }
        }
        ConnectionError::TransportClosed("state channel closed".into())
    }

    async fn release(self: Box<Self>) {
        self.ingest.abort();
        if let Err(err) = self.pc.close().await {
            log::debug!("peer connection close: {err}");
        }
    }
}
