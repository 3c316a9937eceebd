//! Konfiguration
//!
//! Koordinator-Adresse, ICE-Server und Reconnect-Strategie. Die Adresse
//! kommt aus `VOKEY_COORDINATOR_URL` oder fällt auf den lokalen
//! Entwicklungs-Koordinator zurück.

use crate::signaling::ReconnectPolicy;
use thiserror::Error;
use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Umgebungsvariable für die Koordinator-Basisadresse
pub const COORDINATOR_URL_ENV: &str = "VOKEY_COORDINATOR_URL";

/// Standard-Koordinator (lokale Entwicklung)
pub const DEFAULT_COORDINATOR_URL: &str = "ws://localhost:8000";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid coordinator URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported coordinator URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Coordinator URL cannot carry a path: {0}")]
    NotABase(String),

    #[error("Room id must not be empty")]
    EmptyRoomId,
}

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Standard STUN Server Konfiguration
pub fn default_ice_servers() -> Vec<RTCIceServer> {
    vec![RTCIceServer {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ],
        ..Default::default()
    }]
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    /// Basisadresse des Koordinators, immer `ws://` oder `wss://`
    pub coordinator_url: Url,
    pub ice_servers: Vec<RTCIceServer>,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    /// Liest die Konfiguration aus der Umgebung
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(COORDINATOR_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::with_coordinator(url.trim()),
            _ => Self::with_coordinator(DEFAULT_COORDINATOR_URL),
        }
    }

    /// Konfiguration für eine bestimmte Koordinator-Adresse
    ///
    /// `http(s)://` wird auf `ws(s)://` abgebildet.
    pub fn with_coordinator(base: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            coordinator_url: normalize_coordinator_url(base)?,
            ice_servers: default_ice_servers(),
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Fügt einen TURN-Server mit Credentials hinzu
    pub fn add_turn_server(
        &mut self,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) {
        self.ice_servers.push(RTCIceServer {
            urls: vec![url.into()],
            username: username.into(),
            credential: credential.into(),
            ..Default::default()
        });
    }

    /// WebSocket-Adresse eines Raums: `<base>/ws/rooms/<roomId>`
    pub fn room_url(&self, room_id: &str) -> Result<Url, ConfigError> {
        if room_id.is_empty() {
            return Err(ConfigError::EmptyRoomId);
        }

        let mut url = self.coordinator_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConfigError::NotABase(self.coordinator_url.to_string()))?
            .pop_if_empty()
            .extend(["ws", "rooms", room_id]);
        Ok(url)
    }
}

fn normalize_coordinator_url(base: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(base)?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
    }

    if url.cannot_be_a_base() {
        return Err(ConfigError::NotABase(base.to_string()));
    }

    Ok(url)
}
