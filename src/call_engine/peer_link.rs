//! Verbindung zu genau einem Peer
//!
//! Ein `PeerLink` besitzt seine Transport-Session exklusiv. Remote
//! Candidates, die vor der Remote Description ankommen, werden in
//! Ankunftsreihenfolge gepuffert und genau einmal angewendet.

use super::role::Role;
use super::transport::{PeerConnectionState, RemoteStream, TransportError, TransportSession};
use crate::signaling::{IceCandidate, SessionDescription};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// Offer gesendet, warte auf Answer
    OfferSent,
    /// Remote Offer gesetzt, Answer noch nicht gesendet
    AnswerPending,
    Stable,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::OfferSent => "offer-sent",
            Self::AnswerPending => "answer-pending",
            Self::Stable => "stable",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

pub struct PeerLink {
    peer_id: String,
    role: Role,
    state: NegotiationState,
    connection_state: PeerConnectionState,
    session_id: u64,
    session: Box<dyn TransportSession>,
    has_remote_description: bool,
    pending_candidates: VecDeque<IceCandidate>,
    remote_stream: Option<RemoteStream>,
}

impl PeerLink {
    pub fn new(
        peer_id: impl Into<String>,
        role: Role,
        session_id: u64,
        session: Box<dyn TransportSession>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            role,
            state: NegotiationState::Idle,
            connection_state: PeerConnectionState::New,
            session_id,
            session,
            has_remote_description: false,
            pending_candidates: VecDeque::new(),
            remote_stream: None,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn connection_state(&self) -> PeerConnectionState {
        self.connection_state
    }

    /// Generation der Session; Events mit anderer ID sind veraltet
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn session(&self) -> &dyn TransportSession {
        self.session.as_ref()
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub(crate) fn set_state(&mut self, state: NegotiationState) {
        if self.state != state {
            tracing::debug!("Link {}: {} -> {}", self.peer_id, self.state, state);
            self.state = state;
        }
    }

    pub(crate) fn set_connection_state(&mut self, state: PeerConnectionState) {
        self.connection_state = state;
    }

    /// Übernimmt Candidates, die vor dem Link angekommen sind
    pub(crate) fn queue_candidates(&mut self, candidates: impl IntoIterator<Item = IceCandidate>) {
        self.pending_candidates.extend(candidates);
    }

    /// Setzt die Remote Description und wendet danach alle gepufferten
    /// Candidates in Reihenfolge an
    pub async fn apply_remote_description(
        &mut self,
        desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.session.set_remote_description(desc).await?;
        self.has_remote_description = true;

        if !self.pending_candidates.is_empty() {
            tracing::debug!(
                "Applying {} buffered candidate(s) for {}",
                self.pending_candidates.len(),
                self.peer_id
            );
        }
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.apply_candidate(&candidate).await;
        }
        Ok(())
    }

    /// Wendet einen Candidate an oder puffert ihn
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.has_remote_description {
            self.apply_candidate(&candidate).await;
        } else {
            self.pending_candidates.push_back(candidate);
        }
    }

    async fn apply_candidate(&self, candidate: &IceCandidate) {
        if let Err(e) = self.session.add_ice_candidate(candidate).await {
            tracing::warn!("Failed to add candidate from {}: {}", self.peer_id, e);
        }
    }

    /// `false` wenn bereits ein Stream angehängt ist
    pub(crate) fn attach_remote_stream(&mut self, stream: RemoteStream) -> bool {
        if self.remote_stream.is_some() {
            return false;
        }
        self.remote_stream = Some(stream);
        true
    }

    /// Schließt die Session; weitere Aufrufe sind No-ops
    pub async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.session.close().await;
        self.pending_candidates.clear();
        self.set_state(NegotiationState::Closed);
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("has_remote_stream", &self.remote_stream.is_some())
            .finish()
    }
}
