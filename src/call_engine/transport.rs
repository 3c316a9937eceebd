//! Schnittstelle zum Media-Transport
//!
//! Die Call Engine spricht nur über diese Traits mit WebRTC. Callbacks des
//! Transports kommen als [`TransportEvent`] über einen Kanal zurück und
//! tragen die Session-Generation, damit späte Events geschlossener
//! Sessions verworfen werden können.

use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),
}

// ============================================================================
// TYPES
// ============================================================================

/// Gemeinsamer Mikrofon-Track, wird von allen Sessions nur gelesen
pub type LocalTrack = Arc<TrackLocalStaticSample>;

/// Verbindungszustand einer Peer-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Eingehender Audio-Stream eines Peers
#[derive(Clone)]
pub struct RemoteStream {
    peer_id: String,
    stream_id: String,
    mime_type: String,
    track: Option<Arc<TrackRemote>>,
}

impl RemoteStream {
    pub fn new(
        peer_id: impl Into<String>,
        stream_id: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            stream_id: stream_id.into(),
            mime_type: mime_type.into(),
            track: None,
        }
    }

    pub fn with_track(mut self, track: Arc<TrackRemote>) -> Self {
        self.track = Some(track);
        self
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// RTP-Track zum Abspielen (nur beim echten WebRTC-Transport vorhanden)
    pub fn track(&self) -> Option<&Arc<TrackRemote>> {
        self.track.as_ref()
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("peer_id", &self.peer_id)
            .field("stream_id", &self.stream_id)
            .field("mime_type", &self.mime_type)
            .field("has_track", &self.track.is_some())
            .finish()
    }
}

/// Callbacks einer Session, als Nachricht an die Engine
#[derive(Debug, Clone)]
pub enum TransportEvent {
    CandidateGenerated {
        peer_id: String,
        session_id: u64,
        candidate: IceCandidate,
    },
    TrackReceived {
        peer_id: String,
        session_id: u64,
        stream: RemoteStream,
    },
    StateChanged {
        peer_id: String,
        session_id: u64,
        state: PeerConnectionState,
    },
}

impl TransportEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            Self::CandidateGenerated { peer_id, .. }
            | Self::TrackReceived { peer_id, .. }
            | Self::StateChanged { peer_id, .. } => peer_id,
        }
    }

    pub fn session_id(&self) -> u64 {
        match self {
            Self::CandidateGenerated { session_id, .. }
            | Self::TrackReceived { session_id, .. }
            | Self::StateChanged { session_id, .. } => *session_id,
        }
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Erzeugt Sessions, eine pro Peer-Verbindung
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// `local_track` ist `None` solange kein Mikrofon verfügbar ist
    async fn create_session(
        &self,
        peer_id: &str,
        session_id: u64,
        local_track: Option<LocalTrack>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// Eine einzelne Peer-Verbindung (Offer/Answer, Candidates)
#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: &SessionDescription)
        -> Result<(), TransportError>;

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    async fn close(&self);
}
