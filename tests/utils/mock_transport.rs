use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use vokey::call_engine::{
    LocalTrack, MediaTransport, PeerConnectionState, RemoteStream, TransportError,
    TransportEvent, TransportSession,
};
use vokey::signaling::{IceCandidate, SessionDescription};

/// Media transport that "connects" as soon as both descriptions are set.
///
/// Each session emits one local candidate after its local description and,
/// once negotiation completes, a `Connected` state plus one remote track.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    applied_candidates: Arc<Mutex<Vec<(String, String)>>>,
    sessions_created: Arc<Mutex<Vec<String>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(peer, candidate)` pairs applied to any session of this transport.
    pub fn applied_candidates(&self) -> Vec<(String, String)> {
        self.applied_candidates.lock().clone()
    }

    pub fn sessions_created(&self) -> Vec<String> {
        self.sessions_created.lock().clone()
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn create_session(
        &self,
        peer_id: &str,
        session_id: u64,
        _local_track: Option<LocalTrack>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        self.sessions_created.lock().push(peer_id.to_string());

        Ok(Box::new(LoopbackSession {
            peer_id: peer_id.to_string(),
            session_id,
            events,
            has_local: AtomicBool::new(false),
            has_remote: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            applied_candidates: Arc::clone(&self.applied_candidates),
        }))
    }
}

struct LoopbackSession {
    peer_id: String,
    session_id: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    has_local: AtomicBool,
    has_remote: AtomicBool,
    connected: AtomicBool,
    applied_candidates: Arc<Mutex<Vec<(String, String)>>>,
}

impl LoopbackSession {
    fn maybe_connect(&self) {
        let ready = self.has_local.load(Ordering::SeqCst) && self.has_remote.load(Ordering::SeqCst);
        if !ready || self.connected.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.events.send(TransportEvent::StateChanged {
            peer_id: self.peer_id.clone(),
            session_id: self.session_id,
            state: PeerConnectionState::Connected,
        });
        let _ = self.events.send(TransportEvent::TrackReceived {
            peer_id: self.peer_id.clone(),
            session_id: self.session_id,
            stream: RemoteStream::new(
                self.peer_id.clone(),
                format!("stream-{}", self.peer_id),
                "audio/PCMU",
            ),
        });
    }
}

#[async_trait]
impl TransportSession for LoopbackSession {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer(format!("v=0 offer {}", self.session_id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer(format!("v=0 answer {}", self.session_id)))
    }

    async fn set_local_description(
        &self,
        _desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.has_local.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::CandidateGenerated {
            peer_id: self.peer_id.clone(),
            session_id: self.session_id,
            candidate: IceCandidate::new(format!("candidate:{} 1 udp", self.session_id)),
        });
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        _desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.has_remote.store(true, Ordering::SeqCst);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        if !self.has_remote.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidCandidate(
                "remote description not set".to_string(),
            ));
        }
        self.applied_candidates
            .lock()
            .push((self.peer_id.clone(), candidate.candidate.clone()));
        Ok(())
    }

    async fn close(&self) {
        let _ = self.events.send(TransportEvent::StateChanged {
            peer_id: self.peer_id.clone(),
            session_id: self.session_id,
            state: PeerConnectionState::Closed,
        });
    }
}
