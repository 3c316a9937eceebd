//! Peer Negotiation - die Call Engine
//!
//! Hält pro bekanntem Peer genau einen [`PeerLink`] und treibt den
//! Offer/Answer/Candidate-Austausch. Alle Eingaben (Signaling, Membership,
//! Transport-Callbacks, Benutzeraktionen) landen in Queues, die von einer
//! einzigen Schleife abgearbeitet werden. Handler für denselben Link laufen
//! daher nie gleichzeitig.

use super::audio::{LocalMedia, MediaControl, MediaStatus, MicrophoneSource};
use super::peer_link::{NegotiationState, PeerLink};
use super::role::{role, Role};
use super::transport::{
    MediaTransport, PeerConnectionState, RemoteStream, TransportError, TransportEvent,
};
use crate::room::RoomSession;
use crate::signaling::{IceCandidate, SessionDescription, SignalingMessage, SignalingOutput};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// COMMANDS & EVENTS
// ============================================================================

/// Eingaben für die Engine-Schleife
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Join bestätigt; Identität und Peer-Menge stehen in der Session
    Joined,
    /// Peer-Menge hat sich geändert
    PeersChanged,
    /// offer, answer oder ice-candidate vom Koordinator
    Signal(SignalingMessage),
    /// Mikrofon nach Fehler erneut anfordern
    RetryMicrophone,
    /// Link zu einem Peer schließen
    ClosePeer(String),
    /// Alle Links schließen, Mikrofon freigeben, Schleife beenden
    Shutdown,
}

/// Events die von der CallEngine ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    MediaStatusChanged(MediaStatus),
    MuteChanged(bool),
    NegotiationStateChanged {
        peer_id: String,
        state: NegotiationState,
    },
    ConnectionStateChanged {
        peer_id: String,
        state: PeerConnectionState,
    },
    /// Erster (und einziger) eingehender Stream eines Links
    RemoteStreamReady {
        peer_id: String,
        stream: RemoteStream,
    },
    PeerRemoved {
        peer_id: String,
    },
}

/// Steuerung der laufenden Engine von außen
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    event_tx: broadcast::Sender<CallEvent>,
    media: MediaControl,
}

impl EngineHandle {
    /// `false` wenn die Engine bereits beendet ist
    pub fn send(&self, command: EngineCommand) -> bool {
        self.command_tx.send(command).is_ok()
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    pub fn media_status(&self) -> MediaStatus {
        self.media.status()
    }

    pub fn is_muted(&self) -> bool {
        self.media.is_muted()
    }

    /// Schaltet das Mikrofon stumm bzw. an (ohne Neuverhandlung)
    pub fn toggle_mute(&self) -> bool {
        let muted = self.media.toggle_mute();
        tracing::info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        let _ = self.event_tx.send(CallEvent::MuteChanged(muted));
        muted
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("media_status", &self.media_status())
            .field("is_muted", &self.is_muted())
            .finish()
    }
}

// ============================================================================
// CALL ENGINE
// ============================================================================

pub struct CallEngine {
    session: Arc<RwLock<RoomSession>>,
    signaling: Arc<dyn SignalingOutput>,
    transport: Arc<dyn MediaTransport>,
    microphone: Arc<dyn MicrophoneSource>,
    local_media: LocalMedia,

    links: HashMap<String, PeerLink>,
    /// Candidates von Peers, für die noch kein Link existiert
    early_candidates: HashMap<String, Vec<IceCandidate>>,
    /// Offers, die vor der Mikrofon-Freigabe ankamen (neuestes gewinnt)
    deferred_offers: HashMap<String, SessionDescription>,
    known_self_id: Option<String>,
    next_session_id: u64,

    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallEngine {
    /// Erstellt eine neue CallEngine samt Handle
    pub fn new(
        session: Arc<RwLock<RoomSession>>,
        signaling: Arc<dyn SignalingOutput>,
        transport: Arc<dyn MediaTransport>,
        microphone: Arc<dyn MicrophoneSource>,
        start_muted: bool,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(100);

        let media = MediaControl::default();
        media.set_muted(start_muted);

        let handle = EngineHandle {
            command_tx,
            event_tx: event_tx.clone(),
            media: media.clone(),
        };

        let engine = Self {
            session,
            signaling,
            transport,
            microphone,
            local_media: LocalMedia::new(media),
            links: HashMap::new(),
            early_candidates: HashMap::new(),
            deferred_offers: HashMap::new(),
            known_self_id: None,
            next_session_id: 0,
            command_rx,
            transport_tx,
            transport_rx,
            event_tx,
        };

        (engine, handle)
    }

    /// Hauptschleife, läuft bis `Shutdown` oder alle Handles gedroppt sind
    pub async fn run(mut self) {
        tracing::info!("Call engine started");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport_event(event).await;
                }
            }
        }

        self.shutdown().await;
        tracing::info!("Call engine stopped");
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Joined => self.on_joined().await,
            EngineCommand::PeersChanged => self.reconcile().await,
            EngineCommand::Signal(message) => self.on_signal(message).await,
            EngineCommand::RetryMicrophone => self.retry_microphone().await,
            EngineCommand::ClosePeer(peer_id) => self.teardown(&peer_id, "closed locally").await,
            EngineCommand::Shutdown => self.shutdown().await,
        }
    }

    // ========================================================================
    // MEMBERSHIP
    // ========================================================================

    async fn on_joined(&mut self) {
        let Some(self_id) = self.self_id() else {
            return;
        };

        if let Some(previous) = self.known_self_id.as_deref() {
            if previous != self_id {
                tracing::warn!(
                    "Identity changed from {} to {}, dropping all peer links",
                    previous,
                    self_id
                );
                self.teardown_all().await;
                self.early_candidates.clear();
                self.deferred_offers.clear();
            }
        }
        self.known_self_id = Some(self_id);

        if self.local_media.status() == MediaStatus::Unrequested {
            self.acquire_media().await;
        }

        self.reconcile().await;
        self.replay_deferred_offers().await;
    }

    /// Gleicht die Links mit der aktuellen Peer-Menge ab
    async fn reconcile(&mut self) {
        let (self_id, peers) = {
            let session = self.session.read();
            (
                session.self_id().map(str::to_owned),
                session.peer_ids().clone(),
            )
        };

        let stale: Vec<String> = self
            .links
            .keys()
            .filter(|peer_id| !peers.contains(*peer_id))
            .cloned()
            .collect();
        for peer_id in stale {
            self.teardown(&peer_id, "left the room").await;
        }
        self.early_candidates.retain(|peer_id, _| peers.contains(peer_id));
        self.deferred_offers.retain(|peer_id, _| peers.contains(peer_id));

        let Some(self_id) = self_id else {
            return;
        };
        if !self.local_media.is_ready() {
            tracing::debug!("Microphone not ready, deferring outgoing offers");
            return;
        }

        for peer_id in peers {
            if self.links.contains_key(&peer_id) {
                continue;
            }
            if role(&self_id, &peer_id) == Role::Initiator {
                self.initiate(&peer_id).await;
            }
        }
    }

    // ========================================================================
    // MEDIA
    // ========================================================================

    async fn acquire_media(&mut self) {
        let status = self.local_media.acquire(self.microphone.as_ref()).await;
        let _ = self.event_tx.send(CallEvent::MediaStatusChanged(status));
    }

    async fn retry_microphone(&mut self) {
        if self.local_media.is_ready() {
            tracing::debug!("Microphone already granted");
            return;
        }
        if self.known_self_id.is_none() {
            tracing::debug!("Not joined yet, microphone will be requested on join");
            return;
        }

        tracing::info!("Retrying microphone access");
        self.acquire_media().await;
        self.reconcile().await;
        self.replay_deferred_offers().await;
    }

    // ========================================================================
    // NEGOTIATION
    // ========================================================================

    async fn open_link(&mut self, peer_id: &str, role: Role) -> Result<PeerLink, TransportError> {
        self.next_session_id += 1;
        let session_id = self.next_session_id;

        let session = self
            .transport
            .create_session(
                peer_id,
                session_id,
                self.local_media.track(),
                self.transport_tx.clone(),
            )
            .await?;

        let mut link = PeerLink::new(peer_id, role, session_id, session);
        if let Some(early) = self.early_candidates.remove(peer_id) {
            tracing::debug!(
                "Moving {} early candidate(s) from {} into new link",
                early.len(),
                peer_id
            );
            link.queue_candidates(early);
        }
        Ok(link)
    }

    async fn initiate(&mut self, peer_id: &str) {
        tracing::info!("Initiating connection to {}", peer_id);

        let mut link = match self.open_link(peer_id, Role::Initiator).await {
            Ok(link) => link,
            Err(e) => {
                tracing::error!("Failed to create session for {}: {}", peer_id, e);
                return;
            }
        };

        let offer = match create_local_offer(&link).await {
            Ok(offer) => offer,
            Err(e) => {
                tracing::warn!("Failed to create offer for {}: {}", peer_id, e);
                link.close().await;
                return;
            }
        };

        if !self.signaling.send_signal(SignalingMessage::offer(peer_id, offer)) {
            // Ohne Link versucht die nächste Abgleichsrunde es erneut
            tracing::warn!("Offer to {} not sent, signaling is disconnected", peer_id);
            link.close().await;
            return;
        }

        link.set_state(NegotiationState::OfferSent);
        self.links.insert(peer_id.to_string(), link);
        self.emit_negotiation_state(peer_id, NegotiationState::OfferSent);
    }

    async fn on_signal(&mut self, message: SignalingMessage) {
        let Some(from) = message.sender().map(str::to_owned) else {
            tracing::debug!("Ignoring {} message without sender", message.kind());
            return;
        };

        match message {
            SignalingMessage::Offer { payload, .. } => self.on_offer(from, payload).await,
            SignalingMessage::Answer { payload, .. } => self.on_answer(&from, payload).await,
            SignalingMessage::IceCandidate { payload, .. } => {
                self.on_remote_candidate(from, payload).await
            }
            other => tracing::debug!("Ignoring {} message in call engine", other.kind()),
        }
    }

    async fn on_offer(&mut self, from: String, offer: SessionDescription) {
        if !self.is_member(&from) {
            tracing::debug!("Ignoring offer from unknown peer {}", from);
            return;
        }

        if !self.local_media.is_ready() {
            tracing::info!("Deferring offer from {} until microphone is ready", from);
            self.deferred_offers.insert(from, offer);
            return;
        }

        self.answer_offer(&from, offer).await;
    }

    async fn answer_offer(&mut self, from: &str, offer: SessionDescription) {
        if let Some(link) = self.links.get(from) {
            if link.role() == Role::Initiator && link.state() == NegotiationState::OfferSent {
                tracing::warn!("Offer collision with {}, keeping our own offer", from);
                return;
            }
        }

        let mut link = match self.links.remove(from) {
            Some(link) => link,
            None => {
                let Some(self_id) = self.known_self_id.clone() else {
                    return;
                };
                let role = role(&self_id, from);
                if role == Role::Initiator {
                    tracing::warn!("Received offer from {} although we initiate", from);
                }
                match self.open_link(from, role).await {
                    Ok(link) => link,
                    Err(e) => {
                        tracing::error!("Failed to create session for {}: {}", from, e);
                        return;
                    }
                }
            }
        };

        match accept_offer(&mut link, &offer).await {
            Ok(answer) => {
                if self.signaling.send_signal(SignalingMessage::answer(from, answer)) {
                    link.set_state(NegotiationState::Stable);
                    tracing::info!("Answered offer from {}", from);
                } else {
                    tracing::warn!("Answer to {} not sent, signaling is disconnected", from);
                }
            }
            Err(e) => tracing::warn!("Failed to handle offer from {}: {}", from, e),
        }

        let state = link.state();
        self.links.insert(from.to_string(), link);
        self.emit_negotiation_state(from, state);
    }

    async fn on_answer(&mut self, from: &str, answer: SessionDescription) {
        let Some(link) = self.links.get_mut(from) else {
            tracing::debug!("Ignoring answer from {} without link", from);
            return;
        };

        if link.role() != Role::Initiator || link.state() != NegotiationState::OfferSent {
            tracing::debug!(
                "Ignoring answer from {} in state {} ({})",
                from,
                link.state(),
                link.role()
            );
            return;
        }

        if let Err(e) = link.apply_remote_description(&answer).await {
            tracing::warn!("Rejected answer from {}: {}", from, e);
            return;
        }

        link.set_state(NegotiationState::Stable);
        tracing::info!("Negotiation with {} complete", from);
        self.emit_negotiation_state(from, NegotiationState::Stable);
    }

    async fn on_remote_candidate(&mut self, from: String, candidate: IceCandidate) {
        if let Some(link) = self.links.get_mut(&from) {
            link.add_remote_candidate(candidate).await;
            return;
        }

        if self.is_member(&from) {
            tracing::debug!("Buffering early candidate from {}", from);
            self.early_candidates.entry(from).or_default().push(candidate);
        } else {
            tracing::debug!("Ignoring candidate from unknown peer {}", from);
        }
    }

    async fn replay_deferred_offers(&mut self) {
        if !self.local_media.is_ready() || self.deferred_offers.is_empty() {
            return;
        }

        let offers: Vec<_> = self.deferred_offers.drain().collect();
        for (peer_id, offer) in offers {
            if self.is_member(&peer_id) {
                tracing::debug!("Replaying deferred offer from {}", peer_id);
                self.answer_offer(&peer_id, offer).await;
            }
        }
    }

    // ========================================================================
    // TRANSPORT EVENTS
    // ========================================================================

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let current = self.links.get(event.peer_id()).map(PeerLink::session_id);
        if current != Some(event.session_id()) {
            tracing::debug!(
                "Dropping stale transport event for {} (session {})",
                event.peer_id(),
                event.session_id()
            );
            return;
        }

        match event {
            TransportEvent::CandidateGenerated {
                peer_id, candidate, ..
            } => {
                if !self
                    .signaling
                    .send_signal(SignalingMessage::ice_candidate(&peer_id, candidate))
                {
                    tracing::debug!("Local candidate for {} not sent", peer_id);
                }
            }

            TransportEvent::TrackReceived {
                peer_id, stream, ..
            } => {
                let Some(link) = self.links.get_mut(&peer_id) else {
                    return;
                };
                if !link.attach_remote_stream(stream.clone()) {
                    tracing::debug!("Ignoring additional track from {}", peer_id);
                    return;
                }
                tracing::info!("Remote audio from {} ready ({})", peer_id, stream.mime_type());
                let _ = self
                    .event_tx
                    .send(CallEvent::RemoteStreamReady { peer_id, stream });
            }

            TransportEvent::StateChanged { peer_id, state, .. } => {
                if let Some(link) = self.links.get_mut(&peer_id) {
                    link.set_connection_state(state);
                }
                tracing::info!("Peer connection to {}: {}", peer_id, state);
                let _ = self
                    .event_tx
                    .send(CallEvent::ConnectionStateChanged { peer_id, state });
            }
        }
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    async fn teardown(&mut self, peer_id: &str, reason: &str) {
        self.early_candidates.remove(peer_id);
        self.deferred_offers.remove(peer_id);

        let Some(mut link) = self.links.remove(peer_id) else {
            return;
        };
        link.close().await;
        tracing::info!("Closed link to {} ({})", peer_id, reason);

        self.emit_negotiation_state(peer_id, NegotiationState::Closed);
        let _ = self.event_tx.send(CallEvent::PeerRemoved {
            peer_id: peer_id.to_string(),
        });
    }

    async fn teardown_all(&mut self) {
        let peers: Vec<String> = self.links.keys().cloned().collect();
        for peer_id in peers {
            self.teardown(&peer_id, "session reset").await;
        }
    }

    async fn shutdown(&mut self) {
        self.teardown_all().await;
        self.early_candidates.clear();
        self.deferred_offers.clear();
        self.known_self_id = None;

        if self.local_media.status() != MediaStatus::Unrequested {
            self.local_media.stop();
            let _ = self
                .event_tx
                .send(CallEvent::MediaStatusChanged(MediaStatus::Unrequested));
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn self_id(&self) -> Option<String> {
        self.session.read().self_id().map(str::to_owned)
    }

    fn is_member(&self, peer_id: &str) -> bool {
        self.session.read().contains_peer(peer_id)
    }

    fn emit_negotiation_state(&self, peer_id: &str, state: NegotiationState) {
        let _ = self.event_tx.send(CallEvent::NegotiationStateChanged {
            peer_id: peer_id.to_string(),
            state,
        });
    }
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEngine")
            .field("self_id", &self.known_self_id)
            .field("local_media", &self.local_media)
            .field("links", &self.links.values().collect::<Vec<_>>())
            .finish()
    }
}

async fn create_local_offer(link: &PeerLink) -> Result<SessionDescription, TransportError> {
    let offer = link.session().create_offer().await?;
    link.session().set_local_description(&offer).await?;
    Ok(offer)
}

async fn accept_offer(
    link: &mut PeerLink,
    offer: &SessionDescription,
) -> Result<SessionDescription, TransportError> {
    link.apply_remote_description(offer).await?;
    link.set_state(NegotiationState::AnswerPending);

    let answer = link.session().create_answer().await?;
    link.session().set_local_description(&answer).await?;
    Ok(answer)
}
