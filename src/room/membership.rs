//! Room Membership Tracker
//!
//! Wertet `join`, `new-peer` und `peer-left` aus und hält damit
//! [`RoomSession::peer_ids`] aktuell. Öffnet oder schließt selbst keine
//! Media-Verbindungen, sondern meldet nur die Änderung der Peer-Menge.

use super::session::RoomSession;
use crate::signaling::SignalingMessage;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Differenz der Peer-Menge nach einer Membership-Nachricht
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSetChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl PeerSetChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn between(old: &BTreeSet<String>, new: &BTreeSet<String>) -> Self {
        Self {
            added: new.difference(old).cloned().collect(),
            removed: old.difference(new).cloned().collect(),
        }
    }
}

/// Ergebnis einer angewendeten Membership-Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipUpdate {
    /// Join-Bestätigung (auch ein erneuter Join, der alles ersetzt)
    Joined {
        self_id: String,
        previous_self_id: Option<String>,
        change: PeerSetChange,
    },
    /// `new-peer` oder `peer-left` hat die Menge tatsächlich verändert
    PeersChanged(PeerSetChange),
}

/// Pflegt die Peer-Menge einer [`RoomSession`]
#[derive(Debug, Clone)]
pub struct MembershipTracker {
    session: Arc<RwLock<RoomSession>>,
}

impl MembershipTracker {
    pub fn new(session: Arc<RwLock<RoomSession>>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<RwLock<RoomSession>> {
        &self.session
    }

    /// Wendet eine Nachricht an
    ///
    /// Gibt `None` zurück für Nachrichten ohne Membership-Bezug und für
    /// Duplikate bzw. Abgänge unbekannter Peers (No-op).
    pub fn apply(&self, msg: &SignalingMessage) -> Option<MembershipUpdate> {
        let mut session = self.session.write();

        match msg {
            SignalingMessage::Join {
                client_id,
                existing_clients,
                ..
            } => {
                let previous_self_id = session.self_id().map(str::to_owned);
                let next: BTreeSet<String> = existing_clients
                    .iter()
                    .filter(|id| *id != client_id)
                    .cloned()
                    .collect();

                if previous_self_id.is_some() {
                    tracing::warn!(
                        "Received a second join (now {}), resynchronizing peer set",
                        client_id
                    );
                }

                let change = PeerSetChange::between(session.peer_ids(), &next);
                session.set_self_id(Some(client_id.clone()));
                *session.peer_ids_mut() = next;

                tracing::info!(
                    "Joined room {} as {} ({} existing peer(s))",
                    session.room_id(),
                    client_id,
                    session.peer_ids().len()
                );

                Some(MembershipUpdate::Joined {
                    self_id: client_id.clone(),
                    previous_self_id,
                    change,
                })
            }

            SignalingMessage::NewPeer { client_id } => {
                if session.self_id() == Some(client_id.as_str()) {
                    return None;
                }
                if !session.peer_ids_mut().insert(client_id.clone()) {
                    tracing::debug!("Duplicate new-peer for {}, ignoring", client_id);
                    return None;
                }

                tracing::info!("Peer joined: {}", client_id);
                Some(MembershipUpdate::PeersChanged(PeerSetChange {
                    added: vec![client_id.clone()],
                    removed: Vec::new(),
                }))
            }

            SignalingMessage::PeerLeft { client_id } => {
                if !session.peer_ids_mut().remove(client_id) {
                    tracing::debug!("peer-left for unknown peer {}, ignoring", client_id);
                    return None;
                }

                tracing::info!("Peer left: {}", client_id);
                Some(MembershipUpdate::PeersChanged(PeerSetChange {
                    added: Vec::new(),
                    removed: vec![client_id.clone()],
                }))
            }

            _ => None,
        }
    }
}
