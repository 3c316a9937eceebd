//! Test-Doubles für Transport, Mikrofon und Signaling

use super::audio::{AudioError, CaptureStream, MicrophoneSource, FRAME_SIZE};
use super::transport::{LocalTrack, MediaTransport, TransportError, TransportEvent, TransportSession};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription, SignalingMessage, SignalingOutput};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn candidate(name: &str) -> IceCandidate {
    IceCandidate {
        candidate: name.to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
        username_fragment: None,
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Created {
        peer: String,
        session_id: u64,
        with_track: bool,
    },
    SetLocal {
        peer: String,
        kind: SdpKind,
    },
    SetRemote {
        peer: String,
        kind: SdpKind,
    },
    AddCandidate {
        peer: String,
        candidate: String,
    },
    Close {
        peer: String,
    },
}

type EventSenders = HashMap<String, (u64, mpsc::UnboundedSender<TransportEvent>)>;

/// Zeichnet alle Aufrufe auf; SDP mit Präfix "bad" wird abgelehnt
#[derive(Clone, Default)]
pub struct MockTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    senders: Arc<Mutex<EventSenders>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, peer: &str) -> Vec<TransportCall> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                TransportCall::Created { peer: p, .. }
                | TransportCall::SetLocal { peer: p, .. }
                | TransportCall::SetRemote { peer: p, .. }
                | TransportCall::AddCandidate { peer: p, .. }
                | TransportCall::Close { peer: p } => p == peer,
            })
            .collect()
    }

    /// Session-ID der zuletzt für `peer` erzeugten Session
    pub fn session_id(&self, peer: &str) -> Option<u64> {
        self.senders.lock().get(peer).map(|(id, _)| *id)
    }

    /// Schickt ein Event über den Kanal der Session
    pub fn emit(&self, peer: &str, event: TransportEvent) {
        if let Some((_, tx)) = self.senders.lock().get(peer) {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn create_session(
        &self,
        peer_id: &str,
        session_id: u64,
        local_track: Option<LocalTrack>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        self.calls.lock().push(TransportCall::Created {
            peer: peer_id.to_string(),
            session_id,
            with_track: local_track.is_some(),
        });
        self.senders
            .lock()
            .insert(peer_id.to_string(), (session_id, events));

        Ok(Box::new(MockSession {
            peer: peer_id.to_string(),
            session_id,
            calls: Arc::clone(&self.calls),
            has_remote: AtomicBool::new(false),
        }))
    }
}

struct MockSession {
    peer: String,
    session_id: u64,
    calls: Arc<Mutex<Vec<TransportCall>>>,
    has_remote: AtomicBool,
}

impl MockSession {
    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer(format!(
            "offer:{}:{}",
            self.peer, self.session_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer(format!(
            "answer:{}:{}",
            self.peer, self.session_id
        )))
    }

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::SetLocal {
            peer: self.peer.clone(),
            kind: desc.kind,
        });
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        if desc.sdp.starts_with("bad") {
            return Err(TransportError::InvalidSdp(desc.sdp.clone()));
        }
        self.has_remote.store(true, Ordering::SeqCst);
        self.record(TransportCall::SetRemote {
            peer: self.peer.clone(),
            kind: desc.kind,
        });
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        if !self.has_remote.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidCandidate(
                "remote description not set".to_string(),
            ));
        }
        self.record(TransportCall::AddCandidate {
            peer: self.peer.clone(),
            candidate: candidate.candidate.clone(),
        });
        Ok(())
    }

    async fn close(&self) {
        self.record(TransportCall::Close {
            peer: self.peer.clone(),
        });
    }
}

// ============================================================================
// MICROPHONE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicOutcome {
    Granted,
    Denied,
    NoDevice,
}

/// Mikrofon mit umschaltbarem Ergebnis
pub struct FakeMicrophone {
    outcome: Mutex<MicOutcome>,
}

impl FakeMicrophone {
    pub fn new(outcome: MicOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
        })
    }

    pub fn set_outcome(&self, outcome: MicOutcome) {
        *self.outcome.lock() = outcome;
    }
}

struct ToneStream;

impl CaptureStream for ToneStream {
    fn read_frame(&mut self) -> Option<Vec<f32>> {
        Some(vec![0.25; FRAME_SIZE])
    }
}

#[async_trait]
impl MicrophoneSource for FakeMicrophone {
    async fn open(&self) -> Result<Box<dyn CaptureStream>, AudioError> {
        let outcome = *self.outcome.lock();
        match outcome {
            MicOutcome::Granted => Ok(Box::new(ToneStream)),
            MicOutcome::Denied => Err(AudioError::PermissionDenied("denied by user".into())),
            MicOutcome::NoDevice => Err(AudioError::NoInputDevice),
        }
    }
}

// ============================================================================
// SIGNALING
// ============================================================================

/// Zeichnet gesendete Nachrichten auf
pub struct RecordingOutput {
    sent: Mutex<Vec<SignalingMessage>>,
    connected: AtomicBool,
}

impl RecordingOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<SignalingMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl SignalingOutput for RecordingOutput {
    fn send_signal(&self, message: SignalingMessage) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(message);
        true
    }
}
