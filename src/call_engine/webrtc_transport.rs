//! Media-Transport über `webrtc-rs`
//!
//! Eine `RTCPeerConnection` pro Peer. Die Callbacks der Peer Connection
//! werden in [`TransportEvent`]s übersetzt und an die Engine geschickt.

use super::transport::{
    LocalTrack, MediaTransport, PeerConnectionState, RemoteStream, TransportError,
    TransportEvent, TransportSession,
};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

fn webrtc_error(e: webrtc::Error) -> TransportError {
    TransportError::WebRTC(e.to_string())
}

// ============================================================================
// TRANSPORT
// ============================================================================

pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransport {
    /// Baut die WebRTC API einmal auf (Default-Codecs + Interceptors)
    pub fn new(ice_servers: Vec<RTCIceServer>) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(webrtc_error)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(webrtc_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn create_session(
        &self,
        peer_id: &str,
        session_id: u64,
        local_track: Option<LocalTrack>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(webrtc_error)?,
        );

        match local_track {
            Some(track) => {
                let sender = pc
                    .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                    .await
                    .map_err(webrtc_error)?;

                // RTCP muss gelesen werden, sonst laufen die Interceptors nicht
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1500];
                    while sender.read(&mut buf).await.is_ok() {}
                });
            }
            None => {
                // Ohne Mikrofon trotzdem Audio empfangen können
                pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
                    .await
                    .map_err(webrtc_error)?;
            }
        }

        register_handlers(&pc, peer_id, session_id, events);

        tracing::debug!("Created peer connection for {} (session {})", peer_id, session_id);

        Ok(Box::new(WebRtcSession {
            peer_id: peer_id.to_string(),
            pc,
        }))
    }
}

/// Registriert Event Handler für die Peer Connection
fn register_handlers(
    pc: &RTCPeerConnection,
    peer_id: &str,
    session_id: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    // Connection State Handler
    let tx = events.clone();
    let peer = peer_id.to_string();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let state = match s {
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            _ => PeerConnectionState::New,
        };
        let _ = tx.send(TransportEvent::StateChanged {
            peer_id: peer.clone(),
            session_id,
            state,
        });
        Box::pin(async {})
    }));

    // ICE Candidate Handler
    let tx = events.clone();
    let peer = peer_id.to_string();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(c) = candidate {
            match c.to_json() {
                Ok(init) => {
                    let _ = tx.send(TransportEvent::CandidateGenerated {
                        peer_id: peer.clone(),
                        session_id,
                        candidate: IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        },
                    });
                }
                Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    // Track Handler (eingehendes Audio)
    let tx = events;
    let peer = peer_id.to_string();
    pc.on_track(Box::new(move |track, _, _| {
        let codec = track.codec();
        tracing::info!("Received track from {}: {:?}", peer, codec);

        let stream = RemoteStream::new(peer.clone(), track.stream_id(), codec.capability.mime_type)
            .with_track(track);
        let _ = tx.send(TransportEvent::TrackReceived {
            peer_id: peer.clone(),
            session_id,
            stream,
        });
        Box::pin(async {})
    }));
}

// ============================================================================
// SESSION
// ============================================================================

struct WebRtcSession {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let sdp = desc.sdp.clone();
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpKind::Rollback => {
            return Err(TransportError::InvalidSdp(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    parsed.map_err(|e| TransportError::InvalidSdp(e.to_string()))
}

#[async_trait]
impl TransportSession for WebRtcSession {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(webrtc_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await.map_err(webrtc_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(webrtc_error)
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| TransportError::InvalidSdp(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment.clone(),
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::InvalidCandidate(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!("Failed to close peer connection to {}: {}", self.peer_id, e);
        }
    }
}
