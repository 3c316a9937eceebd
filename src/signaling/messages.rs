//! Message Types für das Raum-Protokoll
//!
//! Diese Strukturen spiegeln die JSON-Nachrichten des Raum-Koordinators
//! wider und ermöglichen typsichere Kommunikation.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SIGNALING MESSAGES
// ============================================================================

/// Alle Nachrichten auf dem Signaling-Kanal (beide Richtungen)
///
/// `to` wird vom Client gesetzt, `from` ergänzt der Koordinator beim
/// Weiterleiten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// Bestätigung des Beitritts mit zugewiesener ID
    Join {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "existingClients", default)]
        existing_clients: Vec<String>,
        #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// Ein neuer Peer ist dem Raum beigetreten
    NewPeer {
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Ein Peer hat den Raum verlassen
    PeerLeft {
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// SDP Offer
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        payload: SessionDescription,
    },

    /// SDP Answer
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        payload: SessionDescription,
    },

    /// ICE Candidate
    IceCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        payload: IceCandidate,
    },
}

impl SignalingMessage {
    /// Erstellt ein Offer an einen Peer
    pub fn offer(to: impl Into<String>, payload: SessionDescription) -> Self {
        Self::Offer {
            to: Some(to.into()),
            from: None,
            payload,
        }
    }

    /// Erstellt ein Answer an einen Peer
    pub fn answer(to: impl Into<String>, payload: SessionDescription) -> Self {
        Self::Answer {
            to: Some(to.into()),
            from: None,
            payload,
        }
    }

    /// Erstellt eine ICE-Candidate-Nachricht an einen Peer
    pub fn ice_candidate(to: impl Into<String>, payload: IceCandidate) -> Self {
        Self::IceCandidate {
            to: Some(to.into()),
            from: None,
            payload,
        }
    }

    /// Gibt die Nachrichtenart zurück
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Join { .. } => MessageKind::Join,
            Self::NewPeer { .. } => MessageKind::NewPeer,
            Self::PeerLeft { .. } => MessageKind::PeerLeft,
            Self::Offer { .. } => MessageKind::Offer,
            Self::Answer { .. } => MessageKind::Answer,
            Self::IceCandidate { .. } => MessageKind::IceCandidate,
        }
    }

    /// Absender gerichteter Nachrichten (offer/answer/ice-candidate)
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Offer { from, .. } | Self::Answer { from, .. } | Self::IceCandidate { from, .. } => {
                from.as_deref()
            }
            _ => None,
        }
    }

    /// Empfänger gerichteter Nachrichten
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::IceCandidate { to, .. } => {
                to.as_deref()
            }
            _ => None,
        }
    }
}

/// Nachrichtenart, Schlüssel für `subscribe`/`unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Join,
    NewPeer,
    PeerLeft,
    Offer,
    Answer,
    IceCandidate,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        Self::Join,
        Self::NewPeer,
        Self::PeerLeft,
        Self::Offer,
        Self::Answer,
        Self::IceCandidate,
    ];

    /// Wire-Name des `type`-Felds
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::NewPeer => "new-peer",
            Self::PeerLeft => "peer-left",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PAYLOAD TYPES
// ============================================================================

/// Typ einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session Description wie vom Browser serialisiert (`{type, sdp}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate wie von `RTCIceCandidate.toJSON()` geliefert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_join_from_coordinator() {
        let raw = json!({
            "type": "join",
            "clientId": "alice",
            "roomId": "vokey-abc123",
            "existingClients": ["bob", "carol"]
        });

        let msg: SignalingMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Join {
                client_id: "alice".into(),
                existing_clients: vec!["bob".into(), "carol".into()],
                room_id: Some("vokey-abc123".into()),
            }
        );
        assert_eq!(msg.kind(), MessageKind::Join);
    }

    #[test]
    fn join_without_existing_clients_defaults_to_empty() {
        let msg: SignalingMessage =
            serde_json::from_str(r#"{"type":"join","clientId":"alice"}"#).unwrap();
        match msg {
            SignalingMessage::Join {
                existing_clients, ..
            } => assert!(existing_clients.is_empty()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn outgoing_offer_uses_browser_wire_shape() {
        let msg = SignalingMessage::offer("bob", SessionDescription::offer("v=0"));
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "offer",
                "to": "bob",
                "payload": { "type": "offer", "sdp": "v=0" }
            })
        );
    }

    #[test]
    fn relayed_candidate_keeps_browser_field_names() {
        let raw = json!({
            "type": "ice-candidate",
            "to": "alice",
            "from": "bob",
            "payload": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": "abcd"
            }
        });

        let msg: SignalingMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.kind(), MessageKind::IceCandidate);
        assert_eq!(msg.sender(), Some("bob"));
        assert_eq!(msg.recipient(), Some("alice"));

        let SignalingMessage::IceCandidate { payload, .. } = msg else {
            panic!("expected ice-candidate");
        };
        assert_eq!(payload.sdp_mid.as_deref(), Some("0"));
        assert_eq!(payload.sdp_m_line_index, Some(0));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let res = serde_json::from_str::<SignalingMessage>(r#"{"type":"chat","text":"hi"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn kind_names_match_wire_names() {
        let msg = SignalingMessage::PeerLeft {
            client_id: "bob".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], msg.kind().as_str());
    }
}
