//! vokey - Mesh Voice Rooms
//!
//! Clients treffen sich in einem benannten Raum und bauen direkte
//! P2P-Audioverbindungen zu allen anderen Teilnehmern auf:
//! - Raum-Koordinator per WebSocket für Membership und Signaling
//! - WebRTC für P2P Audio (Full Mesh, kein Media-Relay)
//! - Glare-freie Rollenverteilung über die Client-IDs

pub mod call_engine;
pub mod config;
pub mod room;
pub mod signaling;

use call_engine::{
    CallEngine, CallEvent, EngineCommand, EngineHandle, MediaStatus, MediaTransport,
    MicrophoneSource, TransportError, WebRtcTransport,
};
use parking_lot::{Mutex, RwLock};
use room::{ConnectionStatus, RoomSession};
use signaling::{MessageKind, SignalingChannel, SignalingEvent};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub use config::{Config, ConfigError};

/// Standard-Filter wenn `RUST_LOG` nicht gesetzt ist
pub const DEFAULT_LOG_FILTER: &str = "vokey=debug,webrtc=warn";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert Logging (fmt + EnvFilter); weitere Aufrufe sind No-ops
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// ROOM CLIENT
// ============================================================================

/// Ein Aufenthalt in einem Raum
///
/// Verdrahtet Signaling-Kanal, Membership und Call Engine. Muss innerhalb
/// einer Tokio-Runtime erstellt werden.
pub struct RoomClient {
    room_id: String,
    channel: SignalingChannel,
    engine: EngineHandle,
    engine_task: Mutex<Option<JoinHandle<()>>>,
    status_task: Mutex<Option<JoinHandle<()>>>,
}

impl RoomClient {
    /// Tritt einem Raum bei (WebRTC-Transport, Standard-Mikrofon)
    pub fn join(config: &Config, room_id: &str, start_muted: bool) -> Result<Self, ClientError> {
        let transport = WebRtcTransport::new(config.ice_servers.clone())?;
        Self::join_with(
            config,
            room_id,
            Arc::new(transport),
            default_microphone(),
            start_muted,
        )
    }

    /// Tritt einem Raum mit eigenem Transport und Mikrofon bei
    pub fn join_with(
        config: &Config,
        room_id: &str,
        transport: Arc<dyn MediaTransport>,
        microphone: Arc<dyn MicrophoneSource>,
        start_muted: bool,
    ) -> Result<Self, ClientError> {
        let url = config.room_url(room_id)?;
        tracing::info!("Joining room {} via {}", room_id, url);

        let session = Arc::new(RwLock::new(RoomSession::new(room_id)));
        let channel = SignalingChannel::new(url, config.reconnect, Arc::clone(&session));

        let (engine, handle) = CallEngine::new(
            session,
            Arc::new(channel.clone()),
            transport,
            microphone,
            start_muted,
        );

        // Membership wird vom Kanal angewendet, bevor die Handler laufen
        for kind in MessageKind::ALL {
            let handle = handle.clone();
            channel.subscribe(kind, move |msg| {
                let command = match msg.kind() {
                    MessageKind::Join => EngineCommand::Joined,
                    MessageKind::NewPeer | MessageKind::PeerLeft => EngineCommand::PeersChanged,
                    _ => EngineCommand::Signal(msg.clone()),
                };
                if !handle.send(command) {
                    tracing::debug!("Call engine stopped, dropping {} message", msg.kind());
                }
            });
        }

        let engine_task = tokio::spawn(engine.run());
        let status_task = tokio::spawn(forward_session_end(channel.events(), handle.clone()));
        channel.connect();

        Ok(Self {
            room_id: room_id.to_string(),
            channel,
            engine: handle,
            engine_task: Mutex::new(Some(engine_task)),
            status_task: Mutex::new(Some(status_task)),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Vom Koordinator zugewiesene ID (nach dem Join)
    pub fn self_id(&self) -> Option<String> {
        self.channel.self_id()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.channel.status()
    }

    pub fn peers(&self) -> BTreeSet<String> {
        self.channel.peer_ids()
    }

    pub fn media_status(&self) -> MediaStatus {
        self.engine.media_status()
    }

    pub fn is_muted(&self) -> bool {
        self.engine.is_muted()
    }

    pub fn signaling_events(&self) -> broadcast::Receiver<SignalingEvent> {
        self.channel.events()
    }

    pub fn call_events(&self) -> broadcast::Receiver<CallEvent> {
        self.engine.subscribe()
    }

    /// Schaltet das Mikrofon stumm bzw. an, gibt den neuen Zustand zurück
    pub fn toggle_mute(&self) -> bool {
        self.engine.toggle_mute()
    }

    /// Fordert das Mikrofon nach einem Fehler erneut an
    pub fn retry_microphone(&self) {
        self.engine.send(EngineCommand::RetryMicrophone);
    }

    /// Schließt die Verbindung zu einem einzelnen Peer
    pub fn close_peer(&self, peer_id: &str) {
        self.engine.send(EngineCommand::ClosePeer(peer_id.to_string()));
    }

    /// Verlässt den Raum: Kanal schließen (1000), alle Links schließen,
    /// Mikrofon freigeben
    pub async fn leave(&self) {
        tracing::info!("Leaving room {}", self.room_id);

        self.channel.disconnect().await;
        for kind in MessageKind::ALL {
            self.channel.unsubscribe(kind);
        }

        let status_task = self.status_task.lock().take();
        if let Some(task) = status_task {
            task.abort();
        }

        self.engine.send(EngineCommand::Shutdown);
        let task = self.engine_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Call engine ended abnormally: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for RoomClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomClient")
            .field("room_id", &self.room_id)
            .field("channel", &self.channel)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Nach Verbindungsende ist die Session leer; die Engine schließt dann alle Links
async fn forward_session_end(
    mut events: broadcast::Receiver<SignalingEvent>,
    engine: EngineHandle,
) {
    loop {
        match events.recv().await {
            Ok(SignalingEvent::StatusChanged(ConnectionStatus::Disconnected)) => {
                if !engine.send(EngineCommand::PeersChanged) {
                    return;
                }
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(feature = "cpal")]
fn default_microphone() -> Arc<dyn MicrophoneSource> {
    Arc::new(call_engine::CpalMicrophone)
}

#[cfg(not(feature = "cpal"))]
fn default_microphone() -> Arc<dyn MicrophoneSource> {
    tracing::warn!("Built without the `cpal` feature, sending silence");
    Arc::new(call_engine::SilentMicrophone)
}
