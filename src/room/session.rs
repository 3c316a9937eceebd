//! Lokale Sicht auf den Raum

use std::collections::BTreeSet;
use std::fmt;

/// Zustand des Signaling-Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect-Budget erschöpft, es wird nicht mehr automatisch verbunden
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Ein Raum-Aufenthalt dieses Clients
///
/// Wird nur vom Signaling-Kanal und dem [`MembershipTracker`](super::MembershipTracker)
/// verändert; alle anderen lesen.
#[derive(Debug, Clone, Default)]
pub struct RoomSession {
    room_id: String,
    self_id: Option<String>,
    connection_status: ConnectionStatus,
    peer_ids: BTreeSet<String>,
}

impl RoomSession {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Default::default()
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Vom Koordinator zugewiesene ID, `None` vor der Join-Bestätigung
    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Bekannte Peers (ohne uns selbst), sortiert
    pub fn peer_ids(&self) -> &BTreeSet<String> {
        &self.peer_ids
    }

    pub fn contains_peer(&self, peer_id: &str) -> bool {
        self.peer_ids.contains(peer_id)
    }

    /// Verbunden und mit zugewiesener Identität
    pub fn is_ready(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected && self.self_id.is_some()
    }

    pub(crate) fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
    }

    pub(crate) fn set_self_id(&mut self, self_id: Option<String>) {
        self.self_id = self_id;
    }

    pub(crate) fn peer_ids_mut(&mut self) -> &mut BTreeSet<String> {
        &mut self.peer_ids
    }

    /// Vergisst Identität und Peers (beim Verlassen des Raums)
    pub(crate) fn clear(&mut self) {
        self.self_id = None;
        self.peer_ids.clear();
    }
}
